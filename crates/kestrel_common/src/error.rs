use thiserror::Error;

use crate::types::{Gxid, NodeId};

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coordinator-level request errors. Each variant maps to exactly one
/// error kind on the wire; the mapping lives in the protocol crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Empty participant list, duplicate node in a participant list, a
    /// vote from a node that is not a participant, or an unparsable
    /// request body.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unknown global transaction {0}")]
    UnknownXid(Gxid),

    #[error("Duplicate vote from {node} on {gxid}")]
    DuplicateVote { gxid: Gxid, node: NodeId },

    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(&'static str),

    /// Invariant violation. Unreachable in a correct daemon; logged
    /// loudly where raised.
    #[error("Internal error: {0}")]
    Internal(String),
}
