//! Thread-safe handle to one hierarchy
//!
//! All operations lock the same mutex, so the transport delivery path and
//! application code can share a tree without racing. Each call holds the lock
//! for the whole operation, including every hook it triggers.

use parking_lot::{Mutex, MutexGuard};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use crate::behavior::Disposition;
use crate::error::TreeError;
use crate::health::ErrorState;
use crate::message::Message;
use crate::node::{Node, NodeId};
use crate::topic::Topic;
use crate::tree::Tree;
use crate::value::Transition;

#[derive(Clone)]
pub struct Hierarchy {
    tree: Arc<Mutex<Tree>>,
    root: NodeId,
}

impl Hierarchy {
    pub fn new(root: Node) -> Result<Self, TreeError> {
        let tree = Tree::new(root)?;
        let root = tree.root();
        Ok(Self {
            tree: Arc::new(Mutex::new(tree)),
            root,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Lock the tree for a compound operation
    pub fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock()
    }

    /// Run `f` with exclusive access to the tree
    pub fn with<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        f(&mut self.tree.lock())
    }

    pub fn add_child(&self, parent: NodeId, node: Node) -> Result<NodeId, TreeError> {
        self.tree.lock().add_child(parent, node)
    }

    pub fn add_alias(&self, parent: NodeId, child: NodeId, alias: &str) -> Result<(), TreeError> {
        self.tree.lock().add_alias(parent, child, alias)
    }

    pub fn get_child(&self, parent: NodeId, alias: &str) -> Result<Option<NodeId>, TreeError> {
        self.tree.lock().get_child(parent, alias)
    }

    pub fn get_or_create_child(&self, parent: NodeId, alias: &str) -> Result<NodeId, TreeError> {
        self.tree.lock().get_or_create_child(parent, alias)
    }

    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.tree.lock().remove_child(parent, child)
    }

    pub fn remove_child_by_alias(&self, parent: NodeId, alias: &str) -> Result<(), TreeError> {
        self.tree.lock().remove_child_by_alias(parent, alias)
    }

    pub fn resolve(&self, path: &Topic) -> Option<NodeId> {
        self.tree.lock().resolve(self.root, path)
    }

    pub fn path_of(&self, id: NodeId) -> Result<Topic, TreeError> {
        self.tree.lock().path_of(id)
    }

    /// Snapshot of the current value
    pub fn value(&self, id: NodeId) -> Result<String, TreeError> {
        self.tree.lock().value(id).map(str::to_owned)
    }

    pub fn value_as<T: FromStr>(&self, id: NodeId) -> Result<T, TreeError> {
        self.tree.lock().value_as(id)
    }

    pub fn set_value(&self, id: NodeId, new_value: impl Into<String>) -> Result<Transition, TreeError> {
        self.tree.lock().set_value(id, new_value)
    }

    pub fn modify_value<F>(&self, id: NodeId, f: F) -> Result<Transition, TreeError>
    where
        F: FnOnce(&str) -> String,
    {
        self.tree.lock().modify_value(id, f)
    }

    pub fn modify_value_as<T, F>(&self, id: NodeId, f: F) -> Result<Transition, TreeError>
    where
        T: FromStr + Display,
        F: FnOnce(T) -> T,
    {
        self.tree.lock().modify_value_as(id, f)
    }

    pub fn set_error(&self, id: NodeId, message: impl Into<String>) -> Result<(), TreeError> {
        self.tree.lock().set_error(id, message)
    }

    pub fn clean_error(&self, id: NodeId) -> Result<(), TreeError> {
        self.tree.lock().clean_error(id)
    }

    pub fn error_state(&self, id: NodeId) -> Result<ErrorState, TreeError> {
        self.tree.lock().error_state(id).cloned()
    }

    pub fn is_healthy(&self, id: NodeId) -> Result<bool, TreeError> {
        self.tree.lock().is_healthy(id)
    }

    /// Inject a downward message at the root
    pub fn dispatch(&self, message: &Message) -> Disposition {
        self.tree.lock().dispatch_from_root(message)
    }

    pub fn publish(&self, id: NodeId, topic: &Topic, value: impl Into<bytes::Bytes>) {
        self.tree.lock().publish(id, topic, value);
    }

    pub fn take_outgoing(&self) -> Vec<Message> {
        self.tree.lock().take_outgoing()
    }

    pub fn requeue_outgoing(&self, messages: Vec<Message>) {
        self.tree.lock().requeue_outgoing(messages);
    }

    pub fn outgoing_len(&self) -> usize {
        self.tree.lock().outgoing_len()
    }
}
