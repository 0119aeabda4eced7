//! Override points of a node
//!
//! Every node carries an `Arc<dyn NodeBehavior>`. All hooks run while the
//! hierarchy lock is held and receive a [`NodeContext`] for the node they
//! belong to; they must use that context (never a [`crate::Hierarchy`]
//! handle) to touch the tree.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::TreeError;
use crate::message::{Message, MessageKind};
use crate::node::Node;
use crate::topic::Topic;
use crate::tree::NodeContext;
use crate::value::Transition;

/// Result of offering a downward message to a node
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Rejected,
}

impl Disposition {
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }

    pub fn from_accepted(accepted: bool) -> Self {
        if accepted {
            Self::Accepted
        } else {
            Self::Rejected
        }
    }
}

/// Factory used to materialize a child for an unknown alias
pub type ChildFactory = Arc<dyn Fn(&str) -> Result<Node, TreeError> + Send + Sync>;

/// Hooks of a node. Every method has a default matching a plain router or
/// value leaf.
pub trait NodeBehavior: Send + Sync {
    /// Build a child for `alias` when it is looked up but absent
    fn create_child(&self, alias: &str) -> Result<Node, TreeError> {
        Err(TreeError::UnknownChildName(alias.to_string()))
    }

    /// Called once, right after the node has been linked into the tree
    fn on_attach(&self, _ctx: &mut NodeContext<'_>) {}

    /// A `ValueChange` reached this node and no child accepted it.
    ///
    /// `topic` is what remains after this node; the default accepts only an
    /// empty topic on a node that holds a value.
    fn on_value_change(
        &self,
        ctx: &mut NodeContext<'_>,
        topic: &Topic,
        value: &Bytes,
    ) -> Disposition {
        if !topic.is_empty() || !ctx.has_value() {
            return Disposition::Rejected;
        }
        let text = String::from_utf8_lossy(value).into_owned();
        Disposition::from_accepted(ctx.set_value(text).is_ok())
    }

    /// A subscribe/unsubscribe notification reached this node
    fn on_subscribe(
        &self,
        _ctx: &mut NodeContext<'_>,
        _topic: &Topic,
        _kind: MessageKind,
    ) -> Disposition {
        Disposition::Rejected
    }

    /// The node's value was written (locally or from the wire)
    fn on_set_value(&self, ctx: &mut NodeContext<'_>, transition: &Transition) {
        if transition.changed() {
            ctx.publish(&Topic::empty(), transition.new.clone());
        }
    }

    /// The error shown for this node changed
    fn on_error_changed(&self, ctx: &mut NodeContext<'_>, displayed: Option<&str>) {
        let topic = Topic::meta("error");
        match displayed {
            Some(error) => ctx.publish(&topic, error.to_string()),
            None => ctx.remove(&topic),
        }
    }

    /// A child sent a message up; the topic already carries the child's name
    fn on_message_from_child(&self, ctx: &mut NodeContext<'_>, message: Message) {
        ctx.send_up(message);
    }

    /// Called before the node is freed, after its children are gone
    fn on_remove(&self, _ctx: &mut NodeContext<'_>) {}
}

/// Plain router / value leaf
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBehavior;

impl NodeBehavior for DefaultBehavior {}

/// Default behavior plus a child factory
pub struct FactoryBehavior {
    factory: ChildFactory,
}

impl FactoryBehavior {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Result<Node, TreeError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }
}

impl NodeBehavior for FactoryBehavior {
    fn create_child(&self, alias: &str) -> Result<Node, TreeError> {
        (self.factory)(alias)
    }
}
