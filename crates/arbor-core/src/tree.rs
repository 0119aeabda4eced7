//! Node arena, downward dispatch and the upward message path
//!
//! The [`Tree`] owns every node of one hierarchy. A node's [`ChildRegistry`]
//! decides which ids belong to it; removing a child frees the whole subtree
//! depth-first. Parent links are plain ids, so walking up never keeps a node
//! alive and a removed node can never be reached again.
//!
//! Messages move down through [`Tree::dispatch`], which strips one segment
//! per level, and up through [`Tree::send_up`], which prepends one segment per
//! level until the root queues the message for the transport.
//!
//! [`ChildRegistry`]: crate::registry::ChildRegistry

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, info, trace};

use crate::behavior::{Disposition, NodeBehavior};
use crate::error::TreeError;
use crate::health::ErrorState;
use crate::message::{Message, MessageKind};
use crate::node::{Node, NodeId};
use crate::registry::{check_identity, Route, RouteKind};
use crate::topic::{is_wildcard, Topic, TopicError};
use crate::value::{Transition, ValueCell};

/// All nodes of one hierarchy plus the queue of messages that reached the root
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
    outbox: VecDeque<Message>,
}

impl Tree {
    /// Create a tree around its root node
    pub fn new(root: Node) -> Result<Self, TreeError> {
        check_identity(&root.name)?;
        let root_id = NodeId::from_raw(0);
        let mut tree = Self {
            nodes: HashMap::new(),
            root: root_id,
            next_id: 1,
            outbox: VecDeque::new(),
        };
        info!(root = %root.name, "Created hierarchy");
        tree.nodes.insert(root_id, root);
        tree.hook(root_id, |behavior, ctx| behavior.on_attach(ctx));
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::NodeGone(id))
    }

    pub fn name(&self, id: NodeId) -> Result<&str, TreeError> {
        Ok(self.node(id)?.name())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        Ok(self.node(id)?.parent.get())
    }

    /// Children of `id` in insertion order
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        Ok(self.node(id)?.children.children().to_vec())
    }

    /// Walk parent links up to the node without a parent
    pub fn root_of(&self, id: NodeId) -> Result<NodeId, TreeError> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent.get() {
            current = parent;
        }
        Ok(current)
    }

    /// Topic of `id` relative to the root (the root itself is the empty topic)
    pub fn path_of(&self, id: NodeId) -> Result<Topic, TreeError> {
        let mut names = Vec::new();
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent.get() {
            names.push(current.name.clone());
            current = self.node(parent)?;
        }
        names.reverse();
        Ok(Topic::from_segments(names)?)
    }

    /// Follow exact aliases from `from` along `path`
    pub fn resolve(&self, from: NodeId, path: &Topic) -> Option<NodeId> {
        path.segments().iter().try_fold(from, |current, segment| {
            self.nodes.get(&current)?.children.get(segment)
        })
    }

    // ---- child registry -------------------------------------------------

    /// Link `node` under `parent` and register its name as an alias
    pub fn add_child(&mut self, parent: NodeId, mut node: Node) -> Result<NodeId, TreeError> {
        let id = NodeId::from_raw(self.next_id);
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or(TreeError::NodeGone(parent))?;
        parent_node.children.insert(id, &node.name)?;
        debug!(parent = %parent_node.name, child = %node.name, id = %id, "Added child");
        let inherited = parent_node.errors.displayed().map(str::to_owned);

        self.next_id += 1;
        node.parent.attach(parent);
        self.nodes.insert(id, node);
        self.hook(id, |behavior, ctx| behavior.on_attach(ctx));

        if let Some(fault) = inherited {
            if let Some(child) = self.nodes.get_mut(&id) {
                if child.errors.set_inherited(Some(&fault)) {
                    self.notify_error_changed(id);
                }
            }
        }
        Ok(id)
    }

    /// Register an extra alias for an existing child of `parent`
    pub fn add_alias(&mut self, parent: NodeId, child: NodeId, alias: &str) -> Result<(), TreeError> {
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or(TreeError::NodeGone(parent))?;
        if !parent_node.children.contains(child) {
            return Err(TreeError::NotAChild(child, parent));
        }
        parent_node.children.add_alias(parent, child, alias)?;
        trace!(parent = %parent_node.name, child = %child, alias = alias, "Added alias");
        Ok(())
    }

    /// Exact alias lookup
    pub fn get_child(&self, parent: NodeId, alias: &str) -> Result<Option<NodeId>, TreeError> {
        Ok(self.node(parent)?.children.get(alias))
    }

    /// Look up `alias`, asking the parent's factory to build it when absent
    pub fn get_or_create_child(&mut self, parent: NodeId, alias: &str) -> Result<NodeId, TreeError> {
        if let Some(id) = self.get_child(parent, alias)? {
            return Ok(id);
        }
        check_identity(alias)?;
        let behavior = self.node(parent)?.behavior.clone();
        let node = behavior.create_child(alias)?;
        let id = self.add_child(parent, node)?;
        if self.name(id)? != alias {
            if let Err(e) = self.add_alias(parent, id, alias) {
                self.destroy(id);
                return Err(e);
            }
        }
        info!(parent = %self.name(parent)?, alias = alias, id = %id, "Created child on demand");
        Ok(id)
    }

    /// Remove `child` and its whole subtree
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        if !self.node(parent)?.children.contains(child) {
            return Err(TreeError::NotAChild(child, parent));
        }
        self.destroy(child);
        Ok(())
    }

    pub fn remove_child_by_alias(&mut self, parent: NodeId, alias: &str) -> Result<(), TreeError> {
        let child = self
            .get_child(parent, alias)?
            .ok_or_else(|| TreeError::UnknownChildName(alias.to_string()))?;
        self.remove_child(parent, child)
    }

    /// Depth-first teardown: children first, then the removal hook, then the
    /// registry entry and the node itself
    fn destroy(&mut self, id: NodeId) {
        let children = match self.nodes.get(&id) {
            Some(node) => node.children.children().to_vec(),
            None => return,
        };
        for child in children {
            self.destroy(child);
        }
        self.hook(id, |behavior, ctx| behavior.on_remove(ctx));

        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        if let Some(parent) = node.parent.get() {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.remove(id);
            }
        }
        debug!(node = %node.name, id = %id, "Removed node");
        // a removal hook may have attached new children
        for leftover in node.children.children() {
            self.destroy(*leftover);
        }
    }

    // ---- values ---------------------------------------------------------

    pub fn value(&self, id: NodeId) -> Result<&str, TreeError> {
        let node = self.node(id)?;
        node.value
            .as_ref()
            .map(ValueCell::get)
            .ok_or_else(|| TreeError::NotAValueNode(node.name.clone()))
    }

    pub fn value_as<T: FromStr>(&self, id: NodeId) -> Result<T, TreeError> {
        let node = self.node(id)?;
        let cell = node
            .value
            .as_ref()
            .ok_or_else(|| TreeError::NotAValueNode(node.name.clone()))?;
        Ok(cell.get_as()?)
    }

    fn value_cell_mut(&mut self, id: NodeId) -> Result<&mut ValueCell, TreeError> {
        let Node { name, value, .. } = self.nodes.get_mut(&id).ok_or(TreeError::NodeGone(id))?;
        value
            .as_mut()
            .ok_or_else(|| TreeError::NotAValueNode(name.clone()))
    }

    /// Store a value and run the node's change hook
    pub fn set_value(&mut self, id: NodeId, new_value: impl Into<String>) -> Result<Transition, TreeError> {
        let transition = self.value_cell_mut(id)?.set(new_value);
        self.finish_write(id, &transition);
        Ok(transition)
    }

    /// Read-transform-write plus change hook as one step
    pub fn modify_value<F>(&mut self, id: NodeId, f: F) -> Result<Transition, TreeError>
    where
        F: FnOnce(&str) -> String,
    {
        let transition = self.value_cell_mut(id)?.modify(f);
        self.finish_write(id, &transition);
        Ok(transition)
    }

    /// Typed read-modify-write; a parse failure leaves the value untouched
    pub fn modify_value_as<T, F>(&mut self, id: NodeId, f: F) -> Result<Transition, TreeError>
    where
        T: FromStr + Display,
        F: FnOnce(T) -> T,
    {
        let transition = self.value_cell_mut(id)?.modify_as(f)?;
        self.finish_write(id, &transition);
        Ok(transition)
    }

    fn finish_write(&mut self, id: NodeId, transition: &Transition) {
        trace!(id = %id, old = %transition.old, new = %transition.new, "Value written");
        self.hook(id, |behavior, ctx| behavior.on_set_value(ctx, transition));
    }

    // ---- error state ----------------------------------------------------

    pub fn error_state(&self, id: NodeId) -> Result<&ErrorState, TreeError> {
        Ok(&self.node(id)?.errors)
    }

    pub fn is_healthy(&self, id: NodeId) -> Result<bool, TreeError> {
        Ok(self.node(id)?.errors.is_healthy())
    }

    /// Set the node's own error and mark every descendant as inheriting it
    pub fn set_error(&mut self, id: NodeId, message: impl Into<String>) -> Result<(), TreeError> {
        let message = message.into();
        let node = self.nodes.get_mut(&id).ok_or(TreeError::NodeGone(id))?;
        debug!(node = %node.name, error = %message, "Setting error");
        if node.errors.set_own(message) {
            self.notify_error_changed(id);
        }
        self.propagate_inherited(id);
        Ok(())
    }

    /// Clear the node's own error; descendants only lose the inherited flag
    /// when no other ancestor is still faulty
    pub fn clean_error(&mut self, id: NodeId) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(&id).ok_or(TreeError::NodeGone(id))?;
        if node.errors.clear_own() {
            debug!(node = %node.name, "Cleared error");
            self.notify_error_changed(id);
        }
        self.propagate_inherited(id);
        Ok(())
    }

    fn propagate_inherited(&mut self, id: NodeId) {
        let (fault, children) = match self.nodes.get(&id) {
            Some(node) => (
                node.errors.displayed().map(str::to_owned),
                node.children.children().to_vec(),
            ),
            None => return,
        };
        for child in children {
            let changed = match self.nodes.get_mut(&child) {
                Some(node) => node.errors.set_inherited(fault.as_deref()),
                None => continue,
            };
            if changed {
                self.notify_error_changed(child);
            }
            self.propagate_inherited(child);
        }
    }

    fn notify_error_changed(&mut self, id: NodeId) {
        let displayed = match self.nodes.get(&id) {
            Some(node) => node.errors.displayed().map(str::to_owned),
            None => return,
        };
        self.hook(id, |behavior, ctx| {
            behavior.on_error_changed(ctx, displayed.as_deref())
        });
    }

    // ---- downward dispatch ----------------------------------------------

    /// Offer a downward message to node `id`.
    ///
    /// The node first delegates to every matching child (exact alias, `+`,
    /// `#`, and, with auto-creation, a child built by the factory). Only if
    /// no child accepts does the node apply the message itself through its
    /// hooks.
    pub fn dispatch(&mut self, id: NodeId, message: &Message) -> Disposition {
        let Some(node) = self.nodes.get(&id) else {
            debug!(id = %id, "Dropping message for removed node");
            return Disposition::Rejected;
        };
        let name = node.name.clone();
        trace!(node = %name, kind = %message.kind(), topic = %message.topic(), "Received");

        let mut routes = match node.children.route(message.topic()) {
            Ok(routes) => routes,
            Err(TopicError::Empty) => Vec::new(),
            Err(e) => {
                debug!(node = %name, error = %e, "Cannot route message");
                Vec::new()
            }
        };

        let wants_factory = node.auto_create && !routes.iter().any(|r| r.kind == RouteKind::Exact);
        if wants_factory {
            if let Ok((head, rest)) = message.topic().split_first() {
                if !is_wildcard(head) {
                    match self.get_or_create_child(id, head) {
                        Ok(child) => routes.insert(
                            0,
                            Route {
                                child,
                                topic: rest,
                                kind: RouteKind::Exact,
                            },
                        ),
                        Err(e) => debug!(node = %name, alias = head, error = %e, "Not creating child"),
                    }
                }
            }
        }

        let mut delegated = false;
        for route in routes {
            trace!(node = %name, child = %route.child, via = ?route.kind, "Delegating");
            let forwarded = message.with_topic(route.topic);
            if self.dispatch(route.child, &forwarded).is_accepted() {
                delegated = true;
            }
        }
        if delegated {
            return Disposition::Accepted;
        }

        let outcome = self
            .hook(id, |behavior, ctx| match message.kind() {
                MessageKind::ValueChange => {
                    behavior.on_value_change(ctx, message.topic(), message.value())
                }
                MessageKind::Subscribe | MessageKind::Unsubscribe => {
                    behavior.on_subscribe(ctx, message.topic(), message.kind())
                }
                MessageKind::Publish | MessageKind::Remove => Disposition::Rejected,
            })
            .unwrap_or(Disposition::Rejected);
        trace!(node = %name, outcome = ?outcome, "Applied locally");
        outcome
    }

    /// Dispatch from the root
    pub fn dispatch_from_root(&mut self, message: &Message) -> Disposition {
        self.dispatch(self.root, message)
    }

    // ---- upward path ----------------------------------------------------

    /// Hand `message` (relative to `id`) to the parent of `id`, prefixed
    /// with this node's name; at the root it is queued for the transport
    pub fn send_up(&mut self, id: NodeId, message: Message) {
        let Some(node) = self.nodes.get(&id) else {
            debug!(id = %id, message = %message, "Dropping message from removed node");
            return;
        };
        match node.parent.get() {
            Some(parent) => {
                let prefixed = message.with_topic(message.topic().prepend_unchecked(&node.name));
                let delivered = self.hook(parent, |behavior, ctx| {
                    behavior.on_message_from_child(ctx, prefixed)
                });
                if delivered.is_none() {
                    debug!(id = %id, "Parent is gone, message dropped");
                }
            }
            None => {
                trace!(message = %message, "Queued outgoing message");
                self.outbox.push_back(message);
            }
        }
    }

    pub fn publish(&mut self, id: NodeId, topic: &Topic, value: impl Into<Bytes>) {
        self.send_up(id, Message::publish(topic.clone(), value));
    }

    pub fn remove(&mut self, id: NodeId, topic: &Topic) {
        self.send_up(id, Message::remove(topic.clone()));
    }

    pub fn subscribe(&mut self, id: NodeId, topic: &Topic) {
        self.send_up(id, Message::subscribe(topic.clone()));
    }

    pub fn unsubscribe(&mut self, id: NodeId, topic: &Topic) {
        self.send_up(id, Message::unsubscribe(topic.clone()));
    }

    /// Drain messages queued at the root
    pub fn take_outgoing(&mut self) -> Vec<Message> {
        self.outbox.drain(..).collect()
    }

    /// Put unsent messages back in front of the queue, keeping their order
    pub fn requeue_outgoing(&mut self, messages: Vec<Message>) {
        for message in messages.into_iter().rev() {
            self.outbox.push_front(message);
        }
    }

    pub fn outgoing_len(&self) -> usize {
        self.outbox.len()
    }

    fn hook<R, F>(&mut self, id: NodeId, f: F) -> Option<R>
    where
        F: FnOnce(&dyn NodeBehavior, &mut NodeContext<'_>) -> R,
    {
        let behavior = self.nodes.get(&id)?.behavior.clone();
        let mut ctx = NodeContext { tree: self, id };
        Some(f(behavior.as_ref(), &mut ctx))
    }
}

/// A hook's view of the tree, bound to the node the hook belongs to
pub struct NodeContext<'a> {
    tree: &'a mut Tree,
    id: NodeId,
}

impl<'a> NodeContext<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.tree
            .nodes
            .get(&self.id)
            .map(|node| node.name.as_str())
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.tree.parent(self.id).ok().flatten()
    }

    pub fn has_value(&self) -> bool {
        self.tree
            .nodes
            .get(&self.id)
            .is_some_and(|node| node.has_value())
    }

    pub fn value(&self) -> Option<&str> {
        self.tree.value(self.id).ok()
    }

    pub fn set_value(&mut self, new_value: impl Into<String>) -> Result<Transition, TreeError> {
        self.tree.set_value(self.id, new_value)
    }

    pub fn modify_value<F>(&mut self, f: F) -> Result<Transition, TreeError>
    where
        F: FnOnce(&str) -> String,
    {
        self.tree.modify_value(self.id, f)
    }

    pub fn publish(&mut self, topic: &Topic, value: impl Into<Bytes>) {
        self.tree.publish(self.id, topic, value);
    }

    pub fn remove(&mut self, topic: &Topic) {
        self.tree.remove(self.id, topic);
    }

    pub fn subscribe(&mut self, topic: &Topic) {
        self.tree.subscribe(self.id, topic);
    }

    pub fn unsubscribe(&mut self, topic: &Topic) {
        self.tree.unsubscribe(self.id, topic);
    }

    /// Forward an already-prefixed message one level further up
    pub fn send_up(&mut self, message: Message) {
        self.tree.send_up(self.id, message);
    }

    pub fn set_error(&mut self, message: impl Into<String>) -> Result<(), TreeError> {
        self.tree.set_error(self.id, message)
    }

    pub fn clean_error(&mut self) -> Result<(), TreeError> {
        self.tree.clean_error(self.id)
    }

    pub fn is_healthy(&self) -> bool {
        self.tree.is_healthy(self.id).unwrap_or(true)
    }

    pub fn child(&self, alias: &str) -> Option<NodeId> {
        self.tree.get_child(self.id, alias).ok().flatten()
    }

    pub fn add_child(&mut self, node: Node) -> Result<NodeId, TreeError> {
        self.tree.add_child(self.id, node)
    }

    /// Offer a message to one of this node's children
    pub fn dispatch_to(&mut self, child: NodeId, message: &Message) -> Disposition {
        self.tree.dispatch(child, message)
    }

    /// Full access to the tree
    pub fn tree(&mut self) -> &mut Tree {
        self.tree
    }
}
