//! Hierarchy nodes and their identifiers

use std::fmt;
use std::sync::Arc;

use crate::behavior::{DefaultBehavior, NodeBehavior};
use crate::health::ErrorState;
use crate::registry::ChildRegistry;
use crate::value::ValueCell;

/// Handle to a node inside one hierarchy. Ids are never reused, so a handle
/// to a removed node stays invalid instead of aliasing a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-owning link from a node to its owner. `None` marks the root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentLink(Option<NodeId>);

impl ParentLink {
    pub fn get(&self) -> Option<NodeId> {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn attach(&mut self, parent: NodeId) {
        self.0 = Some(parent);
    }
}

/// A member of the hierarchy.
///
/// Whether a node holds a value is fixed when it is built: use
/// [`Node::router`] for pure routers and [`Node::with_value`] for leaves that
/// carry a value. Behavior (hooks and child factory) is attached with
/// [`Node::behavior`].
pub struct Node {
    pub(crate) name: String,
    pub(crate) parent: ParentLink,
    pub(crate) children: ChildRegistry,
    pub(crate) value: Option<ValueCell>,
    pub(crate) errors: ErrorState,
    pub(crate) auto_create: bool,
    pub(crate) behavior: Arc<dyn NodeBehavior>,
}

impl Node {
    /// Value-less node that only routes messages
    pub fn router(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: ParentLink::default(),
            children: ChildRegistry::new(),
            value: None,
            errors: ErrorState::default(),
            auto_create: false,
            behavior: Arc::new(DefaultBehavior),
        }
    }

    /// Node holding a textual value
    pub fn with_value(name: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            value: Some(ValueCell::new(initial)),
            ..Self::router(name)
        }
    }

    pub fn behavior(self, behavior: impl NodeBehavior + 'static) -> Self {
        self.shared_behavior(Arc::new(behavior))
    }

    pub fn shared_behavior(mut self, behavior: Arc<dyn NodeBehavior>) -> Self {
        self.behavior = behavior;
        self
    }

    /// Let dispatch materialize unknown children through the factory
    pub fn auto_create(mut self, enabled: bool) -> Self {
        self.auto_create = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> ParentLink {
        self.parent
    }

    pub fn children(&self) -> &ChildRegistry {
        &self.children
    }

    pub fn value(&self) -> Option<&ValueCell> {
        self.value.as_ref()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn errors(&self) -> &ErrorState {
        &self.errors
    }

    pub fn is_auto_create(&self) -> bool {
        self.auto_create
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("value", &self.value)
            .field("errors", &self.errors)
            .field("auto_create", &self.auto_create)
            .finish_non_exhaustive()
    }
}
