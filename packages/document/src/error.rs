use crate::{ContainerKind, NodeId};
use thiserror::Error;

/// Errors raised by document reads and observed writes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node {id} is a {actual}, expected a {expected}")]
    KindMismatch {
        id: NodeId,
        expected: ContainerKind,
        actual: ContainerKind,
    },

    #[error("Index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Node {0} is already attached elsewhere")]
    AlreadyAttached(NodeId),

    #[error("Writing node {0} there would create a cycle")]
    Cycle(NodeId),

    #[error("Document root must be a container")]
    ScalarRoot,

    #[error("Write rejected: {0}")]
    WriteRejected(&'static str),
}
