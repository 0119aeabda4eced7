//! Messages exchanged between levels of the hierarchy

use bytes::Bytes;
use std::fmt;

use crate::topic::Topic;

/// What a message asks for.
///
/// `ValueChange` travels down (wire to tree); the other kinds travel up
/// (tree to wire). `Subscribe`/`Unsubscribe` may also be dispatched down as a
/// notification once the transport has acted on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A value arrived from the wire
    ValueChange,
    /// Publish a value
    Publish,
    /// Remove a (retained) topic
    Remove,
    /// Subscribe to a topic pattern
    Subscribe,
    /// Unsubscribe from a topic pattern
    Unsubscribe,
}

/// Direction a message kind normally flows in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Down,
    Up,
}

impl MessageKind {
    pub fn direction(self) -> Direction {
        match self {
            Self::ValueChange => Direction::Down,
            Self::Publish | Self::Remove | Self::Subscribe | Self::Unsubscribe => Direction::Up,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ValueChange => "value-change",
            Self::Publish => "publish",
            Self::Remove => "remove",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        };
        f.write_str(s)
    }
}

/// Immutable message: kind, topic relative to the current level, payload.
///
/// Moving up, each level hands its parent a new message with one more
/// segment at the front. Moving down, each level hands its children a
/// message with one segment fewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    topic: Topic,
    value: Bytes,
}

impl Message {
    fn new(kind: MessageKind, topic: Topic, value: Bytes) -> Self {
        Self { kind, topic, value }
    }

    /// Incoming message from the wire
    pub fn value_change(topic: Topic, value: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::ValueChange, topic, value.into())
    }

    pub fn publish(topic: Topic, value: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Publish, topic, value.into())
    }

    pub fn remove(topic: Topic) -> Self {
        Self::new(MessageKind::Remove, topic, Bytes::new())
    }

    pub fn subscribe(topic: Topic) -> Self {
        Self::new(MessageKind::Subscribe, topic, Bytes::new())
    }

    pub fn unsubscribe(topic: Topic) -> Self {
        Self::new(MessageKind::Unsubscribe, topic, Bytes::new())
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Payload decoded as text; invalid UTF-8 is replaced, not rejected
    pub fn value_text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    /// Same kind and payload, different topic
    pub fn with_topic(&self, topic: Topic) -> Self {
        Self::new(self.kind, topic, self.value.clone())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} = {:?}",
            self.kind,
            self.topic.to_string(),
            String::from_utf8_lossy(&self.value)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions() {
        assert_eq!(MessageKind::ValueChange.direction(), Direction::Down);
        for kind in [
            MessageKind::Publish,
            MessageKind::Remove,
            MessageKind::Subscribe,
            MessageKind::Unsubscribe,
        ] {
            assert_eq!(kind.direction(), Direction::Up);
        }
    }

    #[test]
    fn test_with_topic_keeps_payload() {
        let msg = Message::publish(Topic::parse("t").unwrap(), "21.5");
        let up = msg.with_topic(Topic::parse("d1/t").unwrap());
        assert_eq!(up.kind(), MessageKind::Publish);
        assert_eq!(up.value_text(), "21.5");
        assert_eq!(up.topic().to_string(), "d1/t");
        assert_eq!(msg.topic().to_string(), "t");
    }

    #[test]
    fn test_remove_has_empty_payload() {
        let msg = Message::remove(Topic::parse("d1/meta/error").unwrap());
        assert!(msg.value().is_empty());
    }
}
