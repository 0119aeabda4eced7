//! Error types for tree construction and value access

use thiserror::Error;

use crate::node::NodeId;
use crate::topic::TopicError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error("Alias {0:?} is already registered")]
    DuplicateAlias(String),
    #[error("Name {0:?} is reserved and cannot identify a node")]
    ReservedName(String),
    #[error("No child can be created for alias {0:?}")]
    UnknownChildName(String),
    #[error("Node {0} no longer exists")]
    NodeGone(NodeId),
    #[error("Node {0} is not a child of node {1}")]
    NotAChild(NodeId, NodeId),
    #[error("Node {0:?} does not hold a value")]
    NotAValueNode(String),
    #[error("Invalid control options: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Value(#[from] ValueError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Cannot parse {value:?} as {type_name}")]
    Parse {
        value: String,
        type_name: &'static str,
    },
    #[error("Value {value:?} is not valid for control type {control_type}")]
    Rejected {
        value: String,
        control_type: &'static str,
    },
}
