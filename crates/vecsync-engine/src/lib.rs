//! Vector index synchronization engine.
//!
//! Keeps an HNSW index consistent with a changing set of files and serves
//! similarity queries against it.
//!
//! ## Key Components
//!
//! - [`Chunker`]: splits text into overlapping token windows
//! - [`ExtractorRegistry`]: picks a [`ContentExtractor`] by file extension
//! - [`IndexState`]: graph, id allocator and document table, mutated only by [`CommitBatch`]es
//! - [`Coordinator`]: single-writer commit path, shared-reader search, compaction
//! - [`Persistence`]: snapshot plus commit log on a durable store
//! - [`Reconciler`]: turns file events into commits with per-path ordering and retries
//! - [`SyncEngine`]: the facade tying it together
//!
//! ## Data flow
//!
//! 1. A file event is queued on its path and assigned a sequence number
//! 2. The file is hashed; unchanged content stops here
//! 3. Text is extracted, chunked and embedded outside any lock
//! 4. The coordinator logs the batch, then applies it under the write lock
//! 5. Searches read the state under a shared lock and skip tombstoned nodes

pub mod chunker;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod extract;
pub mod maintenance;
pub mod persistence;
pub mod reconciler;
pub mod scan;
pub mod search;
pub mod state;
pub mod status;

pub use chunker::{Chunk, Chunker};
pub use coordinator::{CommitOutcome, CommitState, CompactionReport, Coordinator, SequenceBoard};
pub use engine::SyncEngine;
pub use error::{EngineError, ExtractionError};
pub use extract::{ContentExtractor, ExtractorRegistry, PlainTextExtractor};
pub use persistence::{LoadReport, Persistence};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle};
pub use scan::ScanPlan;
pub use search::{PathFilter, Query, SearchHit, SearchRequest, SearchResponse};
pub use state::{
    CommitBatch, FailureRecord, IndexState, PreparedBatch, PreparedChunk, RemovalReason,
};
pub use status::{StatusBoard, StatusReport};
