//! Children of a node: ownership order, aliases and topic routing

use std::collections::HashMap;

use crate::error::TreeError;
use crate::node::NodeId;
use crate::topic::{
    is_valid_name, is_wildcard, Topic, TopicError, MULTI_LEVEL_WILDCARD, SINGLE_LEVEL_WILDCARD,
};

/// Segment under which nodes publish their metadata
pub const META_SEGMENT: &str = "meta";

/// How a child was selected for delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Head segment equals one of the child's aliases
    Exact,
    /// Child is registered under `+`, the head segment is consumed
    SingleLevel,
    /// Child is registered under `#`, it receives the whole remaining topic
    MultiLevel,
}

/// One delegation target for a downward message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub child: NodeId,
    pub topic: Topic,
    pub kind: RouteKind,
}

/// Ordered set of owned children plus the alias lookup table.
///
/// Every child's own name is registered as an alias when it is inserted.
/// Alias keys are unique; `+` and `#` may be used as aliases but never as a
/// child's own name.
#[derive(Debug, Clone, Default)]
pub struct ChildRegistry {
    children: Vec<NodeId>,
    aliases: HashMap<String, NodeId>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Children in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.children.contains(&id)
    }

    /// Exact alias lookup, wildcards are not interpreted here
    pub fn get(&self, alias: &str) -> Option<NodeId> {
        self.aliases.get(alias).copied()
    }

    /// All aliases pointing to `id`, sorted
    pub fn aliases_of(&self, id: NodeId) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .aliases
            .iter()
            .filter(|(_, child)| **child == id)
            .map(|(alias, _)| alias.as_str())
            .collect();
        aliases.sort_unstable();
        aliases
    }

    /// Check that `name` can identify a new child
    pub fn check_name(&self, name: &str) -> Result<(), TreeError> {
        check_identity(name)?;
        if self.aliases.contains_key(name) {
            return Err(TreeError::DuplicateAlias(name.to_string()));
        }
        Ok(())
    }

    /// Register a new child under its own name
    pub(crate) fn insert(&mut self, id: NodeId, name: &str) -> Result<(), TreeError> {
        self.check_name(name)?;
        self.children.push(id);
        self.aliases.insert(name.to_string(), id);
        Ok(())
    }

    /// Point an additional alias at an existing child. `owner` is the node
    /// this registry belongs to.
    pub(crate) fn add_alias(&mut self, owner: NodeId, id: NodeId, alias: &str) -> Result<(), TreeError> {
        if !is_wildcard(alias) {
            check_identity(alias)?;
        }
        if !self.contains(id) {
            return Err(TreeError::NotAChild(id, owner));
        }
        if self.aliases.contains_key(alias) {
            return Err(TreeError::DuplicateAlias(alias.to_string()));
        }
        self.aliases.insert(alias.to_string(), id);
        Ok(())
    }

    /// Drop `id` from the children and purge every alias pointing to it
    pub(crate) fn remove(&mut self, id: NodeId) -> bool {
        let before = self.children.len();
        self.children.retain(|child| *child != id);
        self.aliases.retain(|_, child| *child != id);
        before != self.children.len()
    }

    /// Children that should receive a downward message addressed to `topic`.
    ///
    /// The exact alias of the head segment gets the rest of the topic, the
    /// `+` child gets the rest as well, and the `#` child gets the whole
    /// topic. A child reached twice with the same topic is listed once.
    pub fn route(&self, topic: &Topic) -> Result<Vec<Route>, TopicError> {
        let (head, rest) = topic.split_first()?;
        let mut routes: Vec<Route> = Vec::with_capacity(3);
        let mut push = |route: Route| {
            if !routes
                .iter()
                .any(|r| r.child == route.child && r.topic == route.topic)
            {
                routes.push(route);
            }
        };

        if let Some(child) = self.get(head) {
            push(Route {
                child,
                topic: rest.clone(),
                kind: RouteKind::Exact,
            });
        }
        if let Some(child) = self.get(SINGLE_LEVEL_WILDCARD) {
            push(Route {
                child,
                topic: rest,
                kind: RouteKind::SingleLevel,
            });
        }
        if let Some(child) = self.get(MULTI_LEVEL_WILDCARD) {
            push(Route {
                child,
                topic: topic.clone(),
                kind: RouteKind::MultiLevel,
            });
        }
        Ok(routes)
    }
}

/// Validate a node identity (own name or literal alias)
pub fn check_identity(name: &str) -> Result<(), TreeError> {
    if is_wildcard(name) || name == META_SEGMENT {
        return Err(TreeError::ReservedName(name.to_string()));
    }
    if !is_valid_name(name) {
        return Err(TopicError::Invalid {
            raw: name.to_string(),
            reason: "node names must be non-empty and free of '+', '#', '$', '/'",
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> NodeId {
        NodeId::from_raw(n)
    }

    fn t(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    #[test]
    fn test_duplicate_alias_keeps_first() {
        let mut registry = ChildRegistry::new();
        registry.insert(id(1), "temp").unwrap();
        assert_eq!(
            registry.insert(id(2), "temp"),
            Err(TreeError::DuplicateAlias("temp".into()))
        );
        assert_eq!(registry.get("temp"), Some(id(1)));
        assert_eq!(registry.children(), &[id(1)]);
    }

    #[test]
    fn test_reserved_names() {
        let mut registry = ChildRegistry::new();
        for name in ["#", "+", "meta"] {
            assert_eq!(
                registry.insert(id(1), name),
                Err(TreeError::ReservedName(name.into()))
            );
        }
        assert!(matches!(
            registry.insert(id(1), "a/b"),
            Err(TreeError::Topic(TopicError::Invalid { .. }))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_aliases_and_removal() {
        let mut registry = ChildRegistry::new();
        registry.insert(id(1), "temperature").unwrap();
        registry.insert(id(2), "humidity").unwrap();
        registry.add_alias(id(0), id(1), "t").unwrap();
        registry.add_alias(id(0), id(1), "+").unwrap();
        assert_eq!(registry.aliases_of(id(1)), vec!["+", "t", "temperature"]);
        assert_eq!(
            registry.add_alias(id(0), id(2), "t"),
            Err(TreeError::DuplicateAlias("t".into()))
        );
        assert_eq!(
            registry.add_alias(id(0), id(9), "h"),
            Err(TreeError::NotAChild(id(9), id(0)))
        );
        assert_eq!(registry.get("h"), None);

        assert!(registry.remove(id(1)));
        assert_eq!(registry.get("t"), None);
        assert_eq!(registry.get("+"), None);
        assert_eq!(registry.children(), &[id(2)]);
        assert!(!registry.remove(id(1)));
    }

    #[test]
    fn test_route_fans_out_to_all_matches() {
        let mut registry = ChildRegistry::new();
        registry.insert(id(1), "x").unwrap();
        registry.insert(id(2), "any").unwrap();
        registry.insert(id(3), "all").unwrap();
        registry.add_alias(id(0), id(2), "+").unwrap();
        registry.add_alias(id(0), id(3), "#").unwrap();

        let routes = registry.route(&t("x/y")).unwrap();
        assert_eq!(
            routes,
            vec![
                Route { child: id(1), topic: t("y"), kind: RouteKind::Exact },
                Route { child: id(2), topic: t("y"), kind: RouteKind::SingleLevel },
                Route { child: id(3), topic: t("x/y"), kind: RouteKind::MultiLevel },
            ]
        );

        let routes = registry.route(&t("nope")).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(registry.route(&Topic::empty()), Err(TopicError::Empty));
    }

    #[test]
    fn test_route_deduplicates_same_child() {
        let mut registry = ChildRegistry::new();
        registry.insert(id(1), "x").unwrap();
        registry.add_alias(id(0), id(1), "+").unwrap();
        let routes = registry.route(&t("x/y")).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].kind, RouteKind::Exact);
    }
}
