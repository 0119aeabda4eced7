//! Typed value leaves published with their metadata
//!
//! A control lives under a device. When it is attached it publishes its
//! `meta/*` topics and current value, and subscribes to its `on` sub-topic
//! where writes from the wire arrive.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::behavior::{Disposition, NodeBehavior};
use crate::control_type::ControlType;
use crate::error::TreeError;
use crate::message::MessageKind;
use crate::node::Node;
use crate::topic::Topic;
use crate::tree::NodeContext;

/// Sub-topic that carries write requests
pub const ON_SEGMENT: &str = "on";

/// Construction options of a control, checked by [`ControlOptions::validate`]
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOptions {
    pub control_type: &'static ControlType,
    pub units: Option<String>,
    pub description: Option<String>,
    /// Position among the device's controls in a UI
    pub order: Option<u32>,
    pub readonly: bool,
    /// Whether writes on `on` are applied
    pub accepting_messages: bool,
    /// Upper bound, only for `range`
    pub max_value: Option<i64>,
    /// Subscribe to `on` as soon as the control is attached
    pub subscribe_immediately: bool,
    /// Publish metadata on attach and delete it on removal
    pub creating_in_mqtt: bool,
}

impl ControlOptions {
    pub fn new(control_type: &'static ControlType) -> Self {
        Self {
            control_type,
            units: None,
            description: None,
            order: None,
            readonly: false,
            accepting_messages: true,
            max_value: None,
            subscribe_immediately: true,
            creating_in_mqtt: true,
        }
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn accepting_messages(mut self, accepting: bool) -> Self {
        self.accepting_messages = accepting;
        self
    }

    pub fn max_value(mut self, max: i64) -> Self {
        self.max_value = Some(max);
        self
    }

    pub fn subscribe_immediately(mut self, subscribe: bool) -> Self {
        self.subscribe_immediately = subscribe;
        self
    }

    pub fn creating_in_mqtt(mut self, creating: bool) -> Self {
        self.creating_in_mqtt = creating;
        self
    }

    pub fn validate(&self) -> Result<(), TreeError> {
        let invalid = |reason: &str| {
            Err(TreeError::InvalidOptions(format!(
                "{} control: {}",
                self.control_type.meta_type, reason
            )))
        };
        match (self.control_type.is_range(), self.max_value) {
            (true, None) => return invalid("range needs a maximum"),
            (true, Some(max)) if max <= 1 => return invalid("maximum must be greater than 1"),
            (false, Some(_)) => return invalid("maximum is only supported for range"),
            _ => {}
        }
        if self.subscribe_immediately && !self.accepting_messages {
            return invalid("cannot subscribe without accepting messages");
        }
        if self.control_type.needs_units() && self.units.as_deref().map_or(true, str::is_empty) {
            return invalid("generic controls need units");
        }
        Ok(())
    }

    fn description_text(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or(self.control_type.default_description)
    }

    /// `meta/*` topics and their payloads, in publishing order
    fn meta_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![("type", self.control_type.meta_type.to_string())];
        if let Some(units) = &self.units {
            entries.push(("units", units.clone()));
        }
        if let Some(order) = self.order {
            entries.push(("order", order.to_string()));
        }
        if self.readonly {
            entries.push(("readonly", "1".to_string()));
        }
        if let Some(max) = self.max_value {
            entries.push(("max", max.to_string()));
        }
        entries.push(("description", self.description_text().to_string()));
        entries
    }
}

/// Behavior of a control node
pub struct Control {
    options: ControlOptions,
}

impl Control {
    /// Build a control node; `name` defaults to the type's default name
    pub fn build(
        name: Option<&str>,
        initial: impl Into<String>,
        options: ControlOptions,
    ) -> Result<Node, TreeError> {
        options.validate()?;
        let name = name.unwrap_or(options.control_type.default_name);
        Ok(Node::with_value(name, initial).behavior(Control { options }))
    }

    pub fn options(&self) -> &ControlOptions {
        &self.options
    }

    fn on_topic() -> Topic {
        Topic::from_segments([ON_SEGMENT]).unwrap_or_default()
    }

    fn meta_topic(key: &str) -> Topic {
        Topic::meta(key)
    }
}

impl NodeBehavior for Control {
    fn on_attach(&self, ctx: &mut NodeContext<'_>) {
        if self.options.creating_in_mqtt {
            for (key, payload) in self.options.meta_entries() {
                ctx.publish(&Self::meta_topic(key), payload);
            }
            let current = ctx.value().unwrap_or_default().to_string();
            ctx.publish(&Topic::empty(), current);
        }
        if self.options.subscribe_immediately {
            ctx.subscribe(&Self::on_topic());
        }
    }

    fn on_value_change(&self, ctx: &mut NodeContext<'_>, topic: &Topic, value: &Bytes) -> Disposition {
        let via_on = match topic.segments() {
            [] => false,
            [segment] if segment == ON_SEGMENT => true,
            _ => return Disposition::Rejected,
        };
        if via_on && (self.options.readonly || !self.options.accepting_messages) {
            warn!(control = %ctx.name(), "Control does not accept writes");
            return Disposition::Rejected;
        }

        let text = String::from_utf8_lossy(value).into_owned();
        if let Err(e) = self.options.control_type.check(&text, self.options.max_value) {
            warn!(control = %ctx.name(), error = %e, "Rejected value");
            return Disposition::Rejected;
        }
        Disposition::from_accepted(ctx.set_value(text).is_ok())
    }

    fn on_subscribe(&self, ctx: &mut NodeContext<'_>, topic: &Topic, kind: MessageKind) -> Disposition {
        if *topic != Self::on_topic() {
            return Disposition::Rejected;
        }
        debug!(control = %ctx.name(), kind = %kind, "Write topic acknowledged");
        Disposition::Accepted
    }

    fn on_remove(&self, ctx: &mut NodeContext<'_>) {
        if self.options.subscribe_immediately {
            ctx.unsubscribe(&Self::on_topic());
        }
        if !self.options.creating_in_mqtt {
            return;
        }
        for (key, _) in self.options.meta_entries() {
            ctx.remove(&Self::meta_topic(key));
        }
        if !ctx.is_healthy() {
            ctx.remove(&Self::meta_topic("error"));
        }
        ctx.remove(&Topic::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_type::{GENERIC, RANGE, SWITCH, TEMPERATURE};
    use crate::message::Message;
    use crate::tree::Tree;

    fn t(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    fn tree_with(options: ControlOptions) -> (Tree, crate::node::NodeId) {
        let mut tree = Tree::new(Node::router("driver")).unwrap();
        let d1 = tree.add_child(tree.root(), Node::router("d1")).unwrap();
        let control = tree.add_child(d1, Control::build(None, "", options).unwrap()).unwrap();
        (tree, control)
    }

    #[test]
    fn test_options_validation() {
        assert!(ControlOptions::new(&SWITCH).validate().is_ok());
        assert!(ControlOptions::new(&RANGE).validate().is_err());
        assert!(ControlOptions::new(&RANGE).max_value(1).validate().is_err());
        assert!(ControlOptions::new(&RANGE).max_value(100).validate().is_ok());
        assert!(ControlOptions::new(&SWITCH).max_value(5).validate().is_err());
        assert!(ControlOptions::new(&GENERIC).validate().is_err());
        assert!(ControlOptions::new(&GENERIC).units("ppm").validate().is_ok());
        assert!(ControlOptions::new(&SWITCH)
            .accepting_messages(false)
            .validate()
            .is_err());
        assert!(ControlOptions::new(&SWITCH)
            .accepting_messages(false)
            .subscribe_immediately(false)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_attach_publishes_meta_and_subscribes() {
        let (mut tree, _) = tree_with(ControlOptions::new(&TEMPERATURE).order(2).units("C"));
        assert_eq!(
            tree.take_outgoing(),
            vec![
                Message::publish(t("d1/temperature/meta/type"), "temperature"),
                Message::publish(t("d1/temperature/meta/units"), "C"),
                Message::publish(t("d1/temperature/meta/order"), "2"),
                Message::publish(t("d1/temperature/meta/description"), "Temperature"),
                Message::publish(t("d1/temperature"), ""),
                Message::subscribe(t("d1/temperature/on")),
            ]
        );
    }

    #[test]
    fn test_writes_are_validated() {
        let (mut tree, control) = tree_with(ControlOptions::new(&SWITCH));
        tree.take_outgoing();

        let bad = Message::value_change(t("d1/switch/on"), "2");
        assert_eq!(tree.dispatch_from_root(&bad), Disposition::Rejected);
        assert_eq!(tree.value(control).unwrap(), "");

        let good = Message::value_change(t("d1/switch/on"), "1");
        assert!(tree.dispatch_from_root(&good).is_accepted());
        assert_eq!(tree.value(control).unwrap(), "1");
        assert_eq!(tree.take_outgoing(), vec![Message::publish(t("d1/switch"), "1")]);

        let other = Message::value_change(t("d1/switch/meta/type"), "x");
        assert_eq!(tree.dispatch_from_root(&other), Disposition::Rejected);
    }

    #[test]
    fn test_readonly_rejects_on_topic() {
        let options = ControlOptions::new(&TEMPERATURE)
            .readonly(true)
            .subscribe_immediately(false);
        let (mut tree, control) = tree_with(options);
        let on = Message::value_change(t("d1/temperature/on"), "20");
        assert_eq!(tree.dispatch_from_root(&on), Disposition::Rejected);

        let retained = Message::value_change(t("d1/temperature"), "19.5");
        assert!(tree.dispatch_from_root(&retained).is_accepted());
        assert_eq!(tree.value(control).unwrap(), "19.5");
    }

    #[test]
    fn test_range_uses_max() {
        let (mut tree, control) = tree_with(ControlOptions::new(&RANGE).max_value(10));
        let too_big = Message::value_change(t("d1/range/on"), "11");
        assert_eq!(tree.dispatch_from_root(&too_big), Disposition::Rejected);
        let fine = Message::value_change(t("d1/range/on"), "7");
        assert!(tree.dispatch_from_root(&fine).is_accepted());
        assert_eq!(tree.value(control).unwrap(), "7");
    }

    #[test]
    fn test_subscribe_notification() {
        let (mut tree, _) = tree_with(ControlOptions::new(&SWITCH));
        let note = Message::subscribe(t("d1/switch/on"));
        assert!(tree.dispatch_from_root(&note).is_accepted());
        let unrelated = Message::subscribe(t("d1/switch/meta"));
        assert_eq!(tree.dispatch_from_root(&unrelated), Disposition::Rejected);
    }

    #[test]
    fn test_removal_cleans_up() {
        let (mut tree, control) = tree_with(ControlOptions::new(&SWITCH).description("Relay"));
        let d1 = tree.parent(control).unwrap().unwrap();
        tree.set_error(control, "stuck").unwrap();
        tree.take_outgoing();

        tree.remove_child(d1, control).unwrap();
        assert_eq!(
            tree.take_outgoing(),
            vec![
                Message::unsubscribe(t("d1/switch/on")),
                Message::remove(t("d1/switch/meta/type")),
                Message::remove(t("d1/switch/meta/description")),
                Message::remove(t("d1/switch/meta/error")),
                Message::remove(t("d1/switch")),
            ]
        );
    }
}
