//! Result and statistics types shared by graph operations.

use vecsync_types::{DistanceMetric, NodeId};

/// A graph node found by a search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub node_id: NodeId,
    /// Distance to the query (lower = closer)
    pub distance: f32,
}

/// Outcome of a filtered k-NN search.
#[derive(Debug, Clone, Default)]
pub struct FilteredSearch {
    /// Accepted nodes ordered by ascending distance, at most k
    pub hits: Vec<Neighbor>,
    /// Beam width of the final bottom-layer pass
    pub ef_used: usize,
    /// Whether the beam was widened past its initial width
    pub widened: bool,
}

/// Index statistics
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Nodes holding a vector, tombstoned or not
    pub nodes: usize,
    /// Embedding dimension
    pub dimension: usize,
    pub metric: DistanceMetric,
    /// Highest layer in the graph
    pub max_level: usize,
    /// Directed edges across all layers
    pub edges: usize,
}
