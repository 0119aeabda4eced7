//! Arbor Transport - Moving tree messages on and off the wire
//!
//! This crate connects an `arbor_core::Hierarchy` to a publish/subscribe
//! transport:
//! - The `Transport` trait every wire backend implements
//! - `MemoryBroker`, an in-process broker with retained messages and MQTT matching
//! - `Driver`, the root loop translating wire events and outgoing messages

pub mod driver;
pub mod memory;
pub mod transport;

pub use driver::{Driver, DriverConfig, DEFAULT_INBOX_CAPACITY};
pub use memory::{generate_client_id, MemoryBroker, MemoryTransport, DEFAULT_QUEUE_CAPACITY};
pub use transport::{Transport, TransportError, WireEvent, DEFAULT_WAIT_TIMEOUT_MS};
