//! In-process broker
//!
//! `MemoryBroker` keeps retained messages and per-client subscriptions and
//! delivers publishes through bounded channels, one per client. It is the
//! transport used by the daemon and by tests; it can be switched offline to
//! exercise connection failures.

use arbor_core::Topic;
use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::transport::{Transport, TransportError, WireEvent};

/// Default per-client delivery queue length
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Build a client id such as `arbor-3f2a...`
pub fn generate_client_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

struct ClientSlot {
    subscriptions: Vec<Topic>,
    sender: Sender<WireEvent>,
}

struct BrokerState {
    online: bool,
    queue_capacity: usize,
    retained: BTreeMap<String, Bytes>,
    clients: HashMap<String, ClientSlot>,
}

impl BrokerState {
    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.online {
            Ok(())
        } else {
            Err(TransportError::Connection("broker is offline".into()))
        }
    }

    fn deliver(&self, topic: &Topic, event: &WireEvent) -> usize {
        let mut delivered = 0;
        for (client_id, slot) in &self.clients {
            if !slot.subscriptions.iter().any(|pattern| pattern.matches(topic)) {
                continue;
            }
            match slot.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(client = %client_id, topic = %event.topic, "Client queue full, dropping message");
                }
                Err(TrySendError::Disconnected(_)) => {
                    trace!(client = %client_id, "Client receiver gone");
                }
            }
        }
        delivered
    }
}

/// Shared handle to one in-process broker
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                online: true,
                queue_capacity: queue_capacity.max(1),
                retained: BTreeMap::new(),
                clients: HashMap::new(),
            })),
        }
    }

    /// Simulate the broker going away or coming back
    pub fn set_online(&self, online: bool) {
        info!(online, "Broker availability changed");
        self.state.lock().online = online;
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Create a client handle; it is registered on `connect`
    pub fn client(&self, client_id: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
            client_id: client_id.into(),
            receiver: None,
        }
    }

    /// Publish from outside any client, returns how many clients received it.
    ///
    /// A retained publish with an empty payload deletes the retained entry.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>, retain: bool) -> Result<usize, TransportError> {
        let parsed = Topic::parse(topic)?;
        if parsed.is_pattern() || parsed.is_empty() {
            return Err(TransportError::Connection(format!(
                "cannot publish to {:?}",
                topic
            )));
        }
        let event = WireEvent::new(topic, payload);
        let mut state = self.state.lock();
        state.ensure_online()?;
        if retain {
            if event.payload.is_empty() {
                state.retained.remove(topic);
            } else {
                state.retained.insert(topic.to_string(), event.payload.clone());
            }
        }
        let delivered = state.deliver(&parsed, &event);
        trace!(topic = topic, retain, delivered, "Broker publish");
        Ok(delivered)
    }

    /// Current retained payload of `topic`
    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.state.lock().retained.get(topic).cloned()
    }

    /// Every topic with a retained payload, sorted
    pub fn retained_topics(&self) -> Vec<String> {
        self.state.lock().retained.keys().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    fn attach(&self, client_id: &str) -> Result<Receiver<WireEvent>, TransportError> {
        let mut state = self.state.lock();
        state.ensure_online()?;
        let (sender, receiver) = bounded(state.queue_capacity);
        let previous = state.clients.insert(
            client_id.to_string(),
            ClientSlot {
                subscriptions: Vec::new(),
                sender,
            },
        );
        if previous.is_some() {
            debug!(client = client_id, "Replaced existing session");
        }
        Ok(receiver)
    }

    fn detach(&self, client_id: &str) {
        self.state.lock().clients.remove(client_id);
    }

    fn subscribe(&self, client_id: &str, pattern: &Topic) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.ensure_online()?;
        let state = &mut *state;
        let slot = state
            .clients
            .get_mut(client_id)
            .ok_or(TransportError::Disconnected)?;
        if !slot.subscriptions.contains(pattern) {
            slot.subscriptions.push(pattern.clone());
        }

        // retained replay
        for (topic, payload) in &state.retained {
            let matched = Topic::parse(topic).is_ok_and(|t| pattern.matches(&t));
            if !matched {
                continue;
            }
            if let Err(TrySendError::Full(_)) = slot.sender.try_send(WireEvent::new(topic.clone(), payload.clone())) {
                warn!(client = client_id, topic = %topic, "Client queue full, dropping retained message");
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, client_id: &str, pattern: &Topic) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.ensure_online()?;
        let slot = state
            .clients
            .get_mut(client_id)
            .ok_or(TransportError::Disconnected)?;
        slot.subscriptions.retain(|p| p != pattern);
        Ok(())
    }
}

/// One client session on a [`MemoryBroker`]
pub struct MemoryTransport {
    broker: MemoryBroker,
    client_id: String,
    receiver: Option<Receiver<WireEvent>>,
}

impl MemoryTransport {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        if self.receiver.is_some() {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let receiver = self.broker.attach(&self.client_id)?;
        self.receiver = Some(receiver);
        info!(client = %self.client_id, "Connected to in-memory broker");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.receiver.is_some()
    }

    fn publish(&mut self, topic: &Topic, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        self.require_connected()?;
        self.broker
            .publish(&topic.to_string(), Bytes::copy_from_slice(payload), retain)?;
        Ok(())
    }

    fn subscribe(&mut self, pattern: &Topic) -> Result<(), TransportError> {
        self.require_connected()?;
        self.broker.subscribe(&self.client_id, pattern)?;
        debug!(client = %self.client_id, pattern = %pattern, "Subscribed");
        Ok(())
    }

    fn unsubscribe(&mut self, pattern: &Topic) -> Result<(), TransportError> {
        self.require_connected()?;
        self.broker.unsubscribe(&self.client_id, pattern)?;
        debug!(client = %self.client_id, pattern = %pattern, "Unsubscribed");
        Ok(())
    }

    fn receive(&mut self, timeout: Duration, max: usize) -> Result<Vec<WireEvent>, TransportError> {
        let receiver = self.receiver.as_ref().ok_or(TransportError::Disconnected)?;
        if max == 0 {
            return Ok(Vec::new());
        }
        match receiver.recv_timeout(timeout) {
            Ok(first) => {
                let mut events = vec![first];
                events.extend(receiver.try_iter().take(max - 1));
                Ok(events)
            }
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => {
                self.receiver = None;
                Err(TransportError::Disconnected)
            }
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            self.broker.detach(&self.client_id);
        }
    }
}
