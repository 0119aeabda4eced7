//! Wire-side boundary of a hierarchy

use arbor_core::{Topic, TopicError};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Default time a driver waits for wire input in one step
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Transport is not connected")]
    Disconnected,
    #[error("Bad topic: {0}")]
    Topic(#[from] TopicError),
}

/// One message received from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEvent {
    /// Absolute topic, not yet validated
    pub topic: String,
    pub payload: Bytes,
}

impl WireEvent {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A publish/subscribe connection.
///
/// Implementations own reconnection policy; a failed call is reported to the
/// caller and the driver keeps unsent messages queued.
pub trait Transport: Send {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn publish(&mut self, topic: &Topic, payload: &[u8], retain: bool) -> Result<(), TransportError>;

    fn subscribe(&mut self, pattern: &Topic) -> Result<(), TransportError>;

    fn unsubscribe(&mut self, pattern: &Topic) -> Result<(), TransportError>;

    /// Wait up to `timeout` for at most `max` events; returns an empty batch
    /// on timeout. Events beyond `max` stay queued in the transport.
    fn receive(&mut self, timeout: Duration, max: usize) -> Result<Vec<WireEvent>, TransportError>;
}
