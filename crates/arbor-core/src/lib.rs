//! Arbor Core - Hierarchical topic tree and message routing
//!
//! This crate provides the in-process side of Arbor:
//! - Topic parsing, joining and MQTT-style wildcard matching
//! - The node tree: children with aliases, parent links, values and error state
//! - Downward dispatch with `+`/`#` fan-out and the upward publish path
//! - Control types, controls and devices built on the node hooks
//!
//! No I/O happens here; the transport crate moves messages on and off the wire.

pub mod behavior;
pub mod control;
pub mod control_type;
pub mod device;
pub mod error;
pub mod health;
pub mod hierarchy;
pub mod message;
pub mod node;
pub mod registry;
pub mod topic;
pub mod tree;
pub mod value;

pub use behavior::{ChildFactory, DefaultBehavior, Disposition, FactoryBehavior, NodeBehavior};
pub use control::{Control, ControlOptions};
pub use control_type::{ControlType, ValueKind};
pub use device::Device;
pub use error::{TreeError, ValueError};
pub use health::ErrorState;
pub use hierarchy::Hierarchy;
pub use message::{Direction, Message, MessageKind};
pub use node::{Node, NodeId, ParentLink};
pub use registry::{ChildRegistry, Route, RouteKind};
pub use topic::{Topic, TopicError};
pub use tree::{NodeContext, Tree};
pub use value::{Transition, ValueCell};
