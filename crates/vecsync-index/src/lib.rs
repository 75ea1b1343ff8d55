//! # vecsync-index
//!
//! Approximate nearest-neighbor index for the vecsync engine.
//!
//! This crate provides:
//! - `HnswGraph`: a multi-layer proximity graph with filtered, widening-beam
//!   k-NN search and a `rebuild` used by compaction
//! - `IdAllocator`: dense node ids, the tombstone set and the free-list
//! - Cosine and Euclidean distance with their score mappings
//!
//! Deletion is logical only. A tombstoned node keeps its edges so the graph
//! stays connected; compaction rebuilds the graph from live nodes and is the
//! only step that reclaims ids.

pub mod allocator;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod index;

pub use allocator::{CompactionPlan, IdAllocator};
pub use distance::{distance, score};
pub use error::IndexError;
pub use hnsw::{HnswConfig, HnswGraph, InsertPlan};
pub use index::{FilteredSearch, IndexStats, Neighbor};
