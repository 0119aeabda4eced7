//! Root loop between a hierarchy and its transport
//!
//! Wire events are pulled from the transport into a bounded inbox, then
//! applied to the tree in a separate step, so waiting for the network never
//! happens while the tree is locked. Messages that reach the root are
//! translated back into transport calls by [`Driver::flush`].

use arbor_core::{Hierarchy, Message, MessageKind, Topic};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::transport::{Transport, TransportError, WireEvent, DEFAULT_WAIT_TIMEOUT_MS};

/// Default inbox length
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Wire namespace the tree is mounted under, e.g. `devices`
    pub prefix: Topic,
    /// Retain flag used for value and metadata publishes
    pub retain: bool,
    pub inbox_capacity: usize,
    /// Longest single wait inside [`Driver::wait_and_process`]
    pub poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            prefix: Topic::segment("devices").unwrap_or_default(),
            retain: true,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            poll_interval: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
        }
    }
}

/// Owns the transport of one hierarchy
pub struct Driver<T: Transport> {
    hierarchy: Hierarchy,
    transport: T,
    config: DriverConfig,
    inbox_tx: Sender<WireEvent>,
    inbox_rx: Receiver<WireEvent>,
}

impl<T: Transport> Driver<T> {
    pub fn new(hierarchy: Hierarchy, transport: T, config: DriverConfig) -> Self {
        let (inbox_tx, inbox_rx) = bounded(config.inbox_capacity.max(1));
        Self {
            hierarchy,
            transport,
            config,
            inbox_tx,
            inbox_rx,
        }
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Connect and send everything the tree queued so far
    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.transport.connect()?;
        info!(prefix = %self.config.prefix, "Driver connected");
        self.flush()?;
        Ok(())
    }

    /// Messages received but not yet applied
    pub fn pending(&self) -> usize {
        self.inbox_rx.len()
    }

    /// Pull events from the transport into the inbox, waiting up to
    /// `timeout`. Returns the number of pending events (zero on timeout).
    ///
    /// Only as many events as the inbox has room for are taken; the rest
    /// stay queued in the transport for the next call.
    pub fn wait_message(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        let room = self.inbox_capacity().saturating_sub(self.pending());
        if room == 0 {
            trace!(pending = self.pending(), "Inbox full, leaving events in transport");
            return Ok(self.pending());
        }
        let events = self.transport.receive(timeout, room)?;
        for event in events {
            if let Err(e) = self.inbox_tx.try_send(event) {
                // room was reserved above, so only a closed inbox lands here
                warn!(topic = %e.into_inner().topic, "Inbox rejected message");
            }
        }
        Ok(self.pending())
    }

    fn inbox_capacity(&self) -> usize {
        self.inbox_tx.capacity().unwrap_or(usize::MAX)
    }

    /// Apply every pending event to the tree, then flush outgoing messages.
    /// Returns how many events a node accepted.
    pub fn process_saved_messages(&mut self) -> Result<usize, TransportError> {
        let mut accepted = 0;
        while let Ok(event) = self.inbox_rx.try_recv() {
            let Some(message) = self.to_value_change(&event) else {
                continue;
            };
            if self.hierarchy.dispatch(&message).is_accepted() {
                accepted += 1;
            } else {
                debug!(topic = %message.topic(), "No node accepted message");
            }
        }
        self.flush()?;
        Ok(accepted)
    }

    pub fn wait_and_process_one(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        self.wait_message(timeout)?;
        self.process_saved_messages()
    }

    /// Keep waiting and processing until `duration` has passed
    pub fn wait_and_process(&mut self, duration: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + duration;
        let mut accepted = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let step = (deadline - now).min(self.config.poll_interval);
            accepted += self.wait_and_process_one(step)?;
        }
        Ok(accepted)
    }

    /// Send queued outgoing messages. On a transport failure the unsent
    /// messages go back to the front of the queue in order.
    pub fn flush(&mut self) -> Result<usize, TransportError> {
        let mut outgoing = self.hierarchy.take_outgoing().into_iter();
        let mut sent = 0;
        while let Some(message) = outgoing.next() {
            if let Err(e) = self.send(&message) {
                let mut unsent = vec![message];
                unsent.extend(outgoing);
                warn!(error = %e, unsent = unsent.len(), "Transport failed, requeued outgoing messages");
                self.hierarchy.requeue_outgoing(unsent);
                return Err(e);
            }
            sent += 1;
        }
        if sent > 0 {
            debug!(sent, "Flushed outgoing messages");
        }
        Ok(sent)
    }

    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let topic = self.config.prefix.concat(message.topic())?;
        trace!(kind = %message.kind(), topic = %topic, "Sending");
        match message.kind() {
            MessageKind::Publish => self.transport.publish(&topic, message.value(), self.config.retain),
            MessageKind::Remove => self.transport.publish(&topic, &[], true),
            MessageKind::Subscribe => {
                self.transport.subscribe(&topic)?;
                let notification = Message::subscribe(message.topic().clone());
                if !self.hierarchy.dispatch(&notification).is_accepted() {
                    trace!(topic = %message.topic(), "Subscription not claimed by any node");
                }
                Ok(())
            }
            MessageKind::Unsubscribe => self.transport.unsubscribe(&topic),
            MessageKind::ValueChange => {
                warn!(topic = %topic, "Downward message reached the root, ignoring");
                Ok(())
            }
        }
    }

    fn to_value_change(&self, event: &WireEvent) -> Option<Message> {
        let topic = match Topic::parse(&event.topic) {
            Ok(topic) if !topic.is_pattern() => topic,
            Ok(_) => {
                warn!(topic = %event.topic, "Wildcard topic on the wire, dropping");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Invalid wire topic, dropping");
                return None;
            }
        };
        match topic.strip_prefix(&self.config.prefix) {
            Some(relative) if !relative.is_empty() => {
                Some(Message::value_change(relative, event.payload.clone()))
            }
            _ => {
                warn!(topic = %topic, prefix = %self.config.prefix, "Topic outside driver prefix, dropping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBroker, MemoryTransport};
    use arbor_core::control_type::SWITCH;
    use arbor_core::{
        Control, ControlOptions, Device, Disposition, Node, NodeBehavior, NodeContext, NodeId,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(50);

    fn t(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    /// driver -> d1 (device) -> switch
    fn switch_driver(broker: &MemoryBroker) -> Driver<MemoryTransport> {
        let hierarchy = Hierarchy::new(Node::router("driver")).unwrap();
        let d1 = hierarchy
            .add_child(hierarchy.root(), Device::new("Relay board").into_node("d1"))
            .unwrap();
        hierarchy
            .add_child(d1, Control::build(None, "0", ControlOptions::new(&SWITCH)).unwrap())
            .unwrap();
        Driver::new(hierarchy, broker.client("arbor-test"), DriverConfig::default())
    }

    #[test]
    fn test_connect_flushes_metadata() {
        let broker = MemoryBroker::new();
        let mut driver = switch_driver(&broker);
        driver.connect().unwrap();

        assert_eq!(broker.retained("devices/d1/meta/name").as_deref(), Some(&b"Relay board"[..]));
        assert_eq!(broker.retained("devices/d1/switch/meta/type").as_deref(), Some(&b"switch"[..]));
        assert_eq!(broker.retained("devices/d1/switch").as_deref(), Some(&b"0"[..]));
        assert_eq!(driver.hierarchy().outgoing_len(), 0);
    }

    #[test]
    fn test_wire_write_round_trip() {
        let broker = MemoryBroker::new();
        let mut driver = switch_driver(&broker);
        driver.connect().unwrap();

        broker.publish("devices/d1/switch/on", "1", false).unwrap();
        assert_eq!(driver.wait_and_process_one(SHORT).unwrap(), 1);

        let switch = driver.hierarchy().resolve(&t("d1/switch")).unwrap();
        assert_eq!(driver.hierarchy().value(switch).unwrap(), "1");
        assert_eq!(broker.retained("devices/d1/switch").as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn test_foreign_and_invalid_topics_dropped() {
        let broker = MemoryBroker::new();
        let mut driver = switch_driver(&broker);
        driver.connect().unwrap();
        driver.transport_mut().subscribe(&t("other/#")).unwrap();
        driver.transport_mut().subscribe(&t("devices")).unwrap();

        broker.publish("other/d1/switch/on", "1", false).unwrap();
        broker.publish("devices", "1", false).unwrap();
        assert_eq!(driver.wait_message(SHORT).unwrap(), 2);
        assert_eq!(driver.process_saved_messages().unwrap(), 0);
        assert_eq!(driver.pending(), 0);
    }

    #[test]
    fn test_inbox_overflow_leaves_events_in_transport() {
        let hierarchy = Hierarchy::new(Node::router("driver")).unwrap();
        let d1 = hierarchy.add_child(hierarchy.root(), Node::router("d1")).unwrap();
        let controls: Vec<NodeId> = (0..5)
            .map(|i| hierarchy.add_child(d1, Node::with_value(format!("c{i}"), "")).unwrap())
            .collect();
        let broker = MemoryBroker::new();
        let config = DriverConfig {
            inbox_capacity: 2,
            retain: false,
            ..DriverConfig::default()
        };
        let mut driver = Driver::new(hierarchy, broker.client("c"), config);
        driver.connect().unwrap();
        driver.transport_mut().subscribe(&t("devices/d1/+")).unwrap();

        for i in 0..5 {
            broker.publish(&format!("devices/d1/c{i}"), "v", false).unwrap();
        }
        assert_eq!(driver.wait_message(SHORT).unwrap(), 2);
        // full inbox: nothing more is pulled
        assert_eq!(driver.wait_message(SHORT).unwrap(), 2);

        for _ in 0..10 {
            driver.wait_and_process_one(SHORT).unwrap();
        }
        for id in controls {
            assert_eq!(driver.hierarchy().value(id).unwrap(), "v");
        }
    }

    #[test]
    fn test_wildcard_and_malformed_wire_topics_dropped() {
        let broker = MemoryBroker::new();
        let mut driver = switch_driver(&broker);
        driver.connect().unwrap();

        for topic in ["devices/+/x", "devices/d1/#", "devices//x", "devices/d1/sw$itch"] {
            driver.inbox_tx.send(WireEvent::new(topic, "1")).unwrap();
        }
        driver.inbox_tx.send(WireEvent::new("devices/d1/switch/on", "1")).unwrap();
        assert_eq!(driver.pending(), 5);

        assert_eq!(driver.process_saved_messages().unwrap(), 1);
        assert_eq!(driver.pending(), 0);
        let switch = driver.hierarchy().resolve(&t("d1/switch")).unwrap();
        assert_eq!(driver.hierarchy().value(switch).unwrap(), "1");
    }

    #[test]
    fn test_wait_returns_zero_on_timeout() {
        let broker = MemoryBroker::new();
        let mut driver = switch_driver(&broker);
        driver.connect().unwrap();
        let started = Instant::now();
        assert_eq!(driver.wait_message(SHORT).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(driver.wait_and_process(SHORT).unwrap(), 0);
    }

    #[test]
    fn test_failed_flush_requeues() {
        let broker = MemoryBroker::new();
        let mut driver = switch_driver(&broker);
        driver.connect().unwrap();

        let switch = driver.hierarchy().resolve(&t("d1/switch")).unwrap();
        broker.set_online(false);
        driver.hierarchy().set_value(switch, "1").unwrap();
        driver.hierarchy().set_error(switch, "stuck").unwrap();
        assert!(driver.flush().is_err());
        assert_eq!(driver.hierarchy().outgoing_len(), 2);

        broker.set_online(true);
        assert_eq!(driver.flush().unwrap(), 2);
        assert_eq!(broker.retained("devices/d1/switch").as_deref(), Some(&b"1"[..]));
        assert_eq!(broker.retained("devices/d1/switch/meta/error").as_deref(), Some(&b"stuck"[..]));

        driver.hierarchy().clean_error(switch).unwrap();
        driver.flush().unwrap();
        assert_eq!(broker.retained("devices/d1/switch/meta/error"), None);
    }

    struct Watcher {
        seen: Arc<AtomicUsize>,
    }

    impl NodeBehavior for Watcher {
        fn on_attach(&self, ctx: &mut NodeContext<'_>) {
            ctx.subscribe(&Topic::empty());
        }

        fn on_subscribe(&self, _ctx: &mut NodeContext<'_>, topic: &Topic, _kind: MessageKind) -> Disposition {
            if topic.is_empty() {
                self.seen.fetch_add(1, Ordering::SeqCst);
            }
            Disposition::from_accepted(topic.is_empty())
        }
    }

    #[test]
    fn test_subscribe_is_reported_back_down() {
        let seen = Arc::new(AtomicUsize::new(0));
        let hierarchy = Hierarchy::new(Node::router("driver")).unwrap();
        hierarchy
            .add_child(hierarchy.root(), Node::router("w").behavior(Watcher { seen: seen.clone() }))
            .unwrap();
        let broker = MemoryBroker::new();
        let mut driver = Driver::new(hierarchy, broker.client("c"), DriverConfig::default());

        driver.connect().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        broker.publish("devices/w", "x", false).unwrap();
        assert_eq!(driver.wait_message(SHORT).unwrap(), 1);
    }
}
