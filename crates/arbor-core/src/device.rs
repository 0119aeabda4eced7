//! Devices: named groups of controls

use std::sync::Arc;
use tracing::debug;

use crate::behavior::{ChildFactory, NodeBehavior};
use crate::error::TreeError;
use crate::node::Node;
use crate::topic::Topic;
use crate::tree::NodeContext;

/// Behavior of a device node. Publishes its description on `meta/name`
/// and can build unknown controls on demand.
pub struct Device {
    description: String,
    factory: Option<ChildFactory>,
}

impl Device {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            factory: None,
        }
    }

    /// Attach a factory used by `get_or_create_child` and auto-creation
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Node, TreeError> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Router node carrying this behavior; auto-creation is enabled when
    /// the device has a factory
    pub fn into_node(self, name: impl Into<String>) -> Node {
        let auto_create = self.factory.is_some();
        Node::router(name).auto_create(auto_create).behavior(self)
    }
}

impl NodeBehavior for Device {
    fn create_child(&self, alias: &str) -> Result<Node, TreeError> {
        match &self.factory {
            Some(factory) => factory(alias),
            None => Err(TreeError::UnknownChildName(alias.to_string())),
        }
    }

    fn on_attach(&self, ctx: &mut NodeContext<'_>) {
        debug!(device = %ctx.name(), description = %self.description, "Device attached");
        ctx.publish(&Topic::meta("name"), self.description.clone());
    }

    fn on_remove(&self, ctx: &mut NodeContext<'_>) {
        ctx.remove(&Topic::meta("name"));
        if !ctx.is_healthy() {
            ctx.remove(&Topic::meta("error"));
        }
    }
}
