//! Slash-delimited topics and MQTT-style wildcard matching
//!
//! A [`Topic`] is an immutable, validated sequence of segments. Nodes in the
//! hierarchy only ever see the *remaining* suffix of a topic, so the helpers
//! here are built around peeling one segment off the front ([`Topic::split_first`])
//! and prepending one segment on the way up ([`Topic::join`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Matches exactly one segment
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Matches zero or more trailing segments, final position only
pub const MULTI_LEVEL_WILDCARD: &str = "#";
/// Segment separator
pub const SEPARATOR: char = '/';

const RESERVED_CHARS: [char; 4] = ['+', '#', '$', '/'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("Invalid topic {raw:?}: {reason}")]
    Invalid { raw: String, reason: &'static str },
    #[error("Topic has no segments left")]
    Empty,
}

impl TopicError {
    fn invalid(raw: impl Into<String>, reason: &'static str) -> Self {
        Self::Invalid {
            raw: raw.into(),
            reason,
        }
    }
}

/// Check that `name` may be used as a literal segment (and as a node identity)
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(RESERVED_CHARS)
}

/// Check that `segment` is exactly `+` or `#`
pub fn is_wildcard(segment: &str) -> bool {
    segment == SINGLE_LEVEL_WILDCARD || segment == MULTI_LEVEL_WILDCARD
}

/// An ordered sequence of validated topic segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic {
    segments: Vec<String>,
}

impl Topic {
    /// The topic with no segments (a node's own address, relative to itself)
    pub fn empty() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a raw topic string.
    ///
    /// The empty string is the empty topic. Empty segments (`a//b`, `/a`,
    /// `a/`) are rejected, as are reserved characters inside a segment and a
    /// `#` anywhere but the last position.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        if raw.is_empty() {
            return Ok(Self::empty());
        }
        Self::from_segments(raw.split(SEPARATOR)).map_err(|e| match e {
            TopicError::Invalid { reason, .. } => TopicError::invalid(raw, reason),
            other => other,
        })
    }

    /// Build a topic from already-split segments, validating each one
    pub fn from_segments<I, S>(segments: I) -> Result<Self, TopicError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        let last = segments.len().saturating_sub(1);
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(TopicError::invalid(segments.join("/"), "empty segment"));
            }
            if segment == MULTI_LEVEL_WILDCARD {
                if i != last {
                    return Err(TopicError::invalid(
                        segments.join("/"),
                        "'#' is only allowed as the last segment",
                    ));
                }
                continue;
            }
            if segment == SINGLE_LEVEL_WILDCARD {
                continue;
            }
            if segment.contains(RESERVED_CHARS) {
                return Err(TopicError::invalid(
                    segments.join("/"),
                    "segment contains a reserved character",
                ));
            }
        }
        Ok(Self { segments })
    }

    /// Build a one-segment topic
    pub fn segment(name: &str) -> Result<Self, TopicError> {
        Self::from_segments([name])
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether any segment is a wildcard token
    pub fn is_pattern(&self) -> bool {
        self.segments.iter().any(|s| is_wildcard(s))
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Split off the head segment, returning it together with the rest
    pub fn split_first(&self) -> Result<(&str, Topic), TopicError> {
        match self.segments.split_first() {
            Some((head, rest)) => Ok((
                head.as_str(),
                Topic {
                    segments: rest.to_vec(),
                },
            )),
            None => Err(TopicError::Empty),
        }
    }

    /// Prepend `prefix_segment` to `topic`
    pub fn join(prefix_segment: &str, topic: &Topic) -> Result<Topic, TopicError> {
        if !is_valid_name(prefix_segment) && prefix_segment != SINGLE_LEVEL_WILDCARD {
            return Err(TopicError::invalid(
                prefix_segment,
                "prefix is not a valid literal segment",
            ));
        }
        Ok(topic.prepend_unchecked(prefix_segment))
    }

    /// `meta/<key>`; only used with built-in keys
    pub(crate) fn meta(key: &str) -> Topic {
        debug_assert!(is_valid_name(key));
        Topic {
            segments: vec![crate::registry::META_SEGMENT.to_string(), key.to_string()],
        }
    }

    /// Prepend a segment that the caller has already validated (node names)
    pub(crate) fn prepend_unchecked(&self, segment: &str) -> Topic {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(segment.to_string());
        segments.extend(self.segments.iter().cloned());
        Topic { segments }
    }

    /// Append another topic after this one
    pub fn concat(&self, tail: &Topic) -> Result<Topic, TopicError> {
        if tail.is_empty() {
            return Ok(self.clone());
        }
        if self.last() == Some(MULTI_LEVEL_WILDCARD) {
            return Err(TopicError::invalid(
                format!("{}/{}", self, tail),
                "'#' is only allowed as the last segment",
            ));
        }
        let mut segments = self.segments.clone();
        segments.extend(tail.segments.iter().cloned());
        Ok(Topic { segments })
    }

    /// Append one segment
    pub fn child(&self, segment: &str) -> Result<Topic, TopicError> {
        self.concat(&Topic::segment(segment)?)
    }

    /// Remove `prefix` from the front, if this topic starts with it
    pub fn strip_prefix(&self, prefix: &Topic) -> Option<Topic> {
        self.segments
            .strip_prefix(prefix.segments.as_slice())
            .map(|rest| Topic {
                segments: rest.to_vec(),
            })
    }

    /// Whether this pattern matches `concrete`, see [`matches`]
    pub fn matches(&self, concrete: &Topic) -> bool {
        matches(self, concrete)
    }
}

/// MQTT-style matching, evaluated top-down one segment at a time.
///
/// `+` matches exactly one segment, a trailing `#` matches zero or more
/// remaining segments, and any other segment must be equal.
pub fn matches(pattern: &Topic, concrete: &Topic) -> bool {
    let mut pattern_segments = pattern.segments.iter();
    let mut concrete_segments = concrete.segments.iter();
    loop {
        match (pattern_segments.next(), concrete_segments.next()) {
            (Some(p), _) if p == MULTI_LEVEL_WILDCARD => return true,
            (Some(p), Some(c)) => {
                if p != SINGLE_LEVEL_WILDCARD && p != c {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::parse(&value)
    }
}

impl TryFrom<&str> for Topic {
    type Error = TopicError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Topic::parse(value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cases: [&[&str]; 4] = [
            &["a"],
            &["devices", "room", "temperature"],
            &["d1", "+", "meta", "#"],
            &["x-1", "y_2", "z.3"],
        ];
        for segments in cases {
            let topic = Topic::from_segments(segments.iter().copied()).unwrap();
            let reparsed = Topic::parse(&topic.to_string()).unwrap();
            assert_eq!(reparsed.segments(), segments);
        }
        assert_eq!(Topic::parse("").unwrap(), Topic::empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in ["a//b", "/a", "a/", "a/#/b", "a$b", "a+/b", "x/#y"] {
            assert!(
                matches!(Topic::parse(raw), Err(TopicError::Invalid { .. })),
                "{raw} should be rejected"
            );
        }
        assert!(Topic::parse("a/+/b").is_ok());
        assert!(Topic::parse("#").is_ok());
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(matches(&t("a/+/c"), &t("a/b/c")));
        assert!(!matches(&t("a/+/c"), &t("a/b/b/c")));
        assert!(matches(&t("a/#"), &t("a/b/c")));
        assert!(matches(&t("a/#"), &t("a")));
        assert!(matches(&t("#"), &t("anything/at/all")));
        assert!(!matches(&t("a/+"), &t("a")));
        assert!(!matches(&t("a/b"), &t("a/b/c")));
        assert!(t("a/b").matches(&t("a/b")));
    }

    #[test]
    fn test_split_first() {
        let topic = t("x/y/z");
        let (head, rest) = topic.split_first().unwrap();
        assert_eq!(head, "x");
        assert_eq!(rest, t("y/z"));

        let single = t("x");
        let (head, rest) = single.split_first().unwrap();
        assert_eq!(head, "x");
        assert!(rest.is_empty());

        assert_eq!(Topic::empty().split_first(), Err(TopicError::Empty));
    }

    #[test]
    fn test_join_and_concat() {
        assert_eq!(Topic::join("d1", &t("t")).unwrap(), t("d1/t"));
        assert_eq!(Topic::join("d1", &Topic::empty()).unwrap(), t("d1"));
        assert!(Topic::join("a/b", &t("c")).is_err());
        assert!(Topic::join("#", &t("c")).is_err());

        assert_eq!(t("devices").concat(&t("d1/t")).unwrap(), t("devices/d1/t"));
        assert!(t("devices/#").concat(&t("x")).is_err());
        assert_eq!(t("d1").child("meta").unwrap(), t("d1/meta"));
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(t("devices/d1/t").strip_prefix(&t("devices")), Some(t("d1/t")));
        assert_eq!(t("devices").strip_prefix(&t("devices")), Some(Topic::empty()));
        assert_eq!(t("other/d1").strip_prefix(&t("devices")), None);
    }

    #[test]
    fn test_names() {
        assert!(is_valid_name("temperature"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("+"));
        assert!(!is_valid_name("a/b"));
        assert!(is_wildcard("#"));
        assert!(t("a/+").is_pattern());
        assert!(!t("a/b").is_pattern());
    }
}
