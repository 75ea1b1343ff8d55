//! Index error types.

use thiserror::Error;
use vecsync_types::NodeId;

/// Errors that can occur during graph and allocator operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Node id already holds a vector
    #[error("Node already present: {0}")]
    DuplicateNode(NodeId),

    /// Node id does not hold a vector
    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    /// Tombstone requested for an id that is already tombstoned
    #[error("Node {0} is already tombstoned")]
    AlreadyTombstoned(NodeId),

    /// Tombstone requested for an id the allocator never handed out
    #[error("Node {0} was never allocated")]
    NeverAllocated(NodeId),

    /// The id space is used up
    #[error("Node id space exhausted")]
    IdsExhausted,

    /// Structural mutation attempted while compaction holds the graph
    #[error("Index is being compacted")]
    ConcurrencyViolation,

    /// Insert plan computed against an older graph
    #[error("Insert plan made at insertion {planned}, graph is at {current}")]
    StalePlan { planned: u64, current: u64 },

    /// Structural invariant does not hold
    #[error("Index invariant violated: {0}")]
    Invariant(String),
}
