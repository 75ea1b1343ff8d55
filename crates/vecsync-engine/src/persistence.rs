//! Snapshot and commit-log encoding on top of a [`DurableStore`].
//!
//! The snapshot is a bincode blob of the whole [`IndexState`]; every commit
//! after it is a bincode log record keyed by the generation it produced.
//! Loading decodes the snapshot, checks invariants and replays the log.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vecsync_index::{HnswConfig, HnswGraph, IdAllocator};
use vecsync_storage::{DurableStore, StorageStats};
use vecsync_types::DocumentRecord;

use crate::error::EngineError;
use crate::state::{CommitBatch, FailureRecord, IndexState};

/// Bumped whenever the snapshot layout changes.
pub const FORMAT_VERSION: u32 = 2;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    generation: u64,
    graph: &'a HnswGraph,
    allocator: &'a IdAllocator,
    documents: &'a BTreeMap<PathBuf, DocumentRecord>,
    failures: &'a BTreeMap<PathBuf, FailureRecord>,
    last_compaction: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct Snapshot {
    format_version: u32,
    generation: u64,
    graph: HnswGraph,
    allocator: IdAllocator,
    documents: BTreeMap<PathBuf, DocumentRecord>,
    failures: BTreeMap<PathBuf, FailureRecord>,
    last_compaction: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct LogRecordRef<'a> {
    generation: u64,
    batch: &'a CommitBatch,
}

#[derive(Deserialize)]
struct LogRecord {
    generation: u64,
    batch: CommitBatch,
}

/// What startup found in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub snapshot_generation: Option<u64>,
    /// Log records applied on top of the snapshot
    pub replayed: usize,
    /// Generation after replay
    pub generation: u64,
}

/// Reads and writes index state through a durable store.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn DurableStore>,
}

impl Persistence {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Encode the full state as a snapshot blob.
    pub fn encode_snapshot(state: &IndexState) -> Result<Vec<u8>, EngineError> {
        let snapshot = SnapshotRef {
            format_version: FORMAT_VERSION,
            generation: state.generation(),
            graph: state.graph(),
            allocator: state.allocator(),
            documents: state.documents(),
            failures: state.failures(),
            last_compaction: state.last_compaction(),
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    pub fn encode_record(generation: u64, batch: &CommitBatch) -> Result<Vec<u8>, EngineError> {
        Ok(bincode::serialize(&LogRecordRef { generation, batch })?)
    }

    /// Store a pre-encoded snapshot, truncating the log it covers.
    pub fn write_snapshot(&self, generation: u64, blob: &[u8]) -> Result<(), EngineError> {
        self.store.save_snapshot(generation, blob)?;
        self.store.flush()?;
        info!(generation, bytes = blob.len(), "Wrote index snapshot");
        Ok(())
    }

    pub fn snapshot(&self, state: &IndexState) -> Result<(), EngineError> {
        let blob = Self::encode_snapshot(state)?;
        self.write_snapshot(state.generation(), &blob)
    }

    /// Append the record of the commit producing `generation`.
    pub fn append(&self, generation: u64, batch: &CommitBatch) -> Result<(), EngineError> {
        let record = Self::encode_record(generation, batch)?;
        self.store.append_log(generation, &record)?;
        debug!(generation, bytes = record.len(), path = %batch.path.display(), "Appended commit record");
        Ok(())
    }

    /// Discard everything persisted.
    pub fn clear(&self) -> Result<(), EngineError> {
        self.store.clear()?;
        Ok(())
    }

    /// Reclaim store space freed by log truncation.
    pub fn compact_storage(&self) -> Result<(), EngineError> {
        self.store.compact()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StorageStats, EngineError> {
        Ok(self.store.stats()?)
    }

    /// Rebuild the state from the snapshot plus log.
    ///
    /// An empty store yields a fresh state. Anything undecodable, a graph
    /// that does not match `config`'s dimension or metric, a gap in the log,
    /// or a broken invariant is reported as `IndexCorruption`.
    pub fn load(&self, config: &HnswConfig) -> Result<(IndexState, LoadReport), EngineError> {
        let mut report = LoadReport::default();

        let mut state = match self.store.load_snapshot()? {
            Some((generation, blob)) => {
                let snapshot: Snapshot = bincode::deserialize(&blob).map_err(|e| {
                    EngineError::IndexCorruption(format!("undecodable snapshot: {}", e))
                })?;
                if snapshot.format_version != FORMAT_VERSION {
                    return Err(EngineError::IndexCorruption(format!(
                        "snapshot format {} is not supported (expected {})",
                        snapshot.format_version, FORMAT_VERSION
                    )));
                }
                if snapshot.generation != generation {
                    return Err(EngineError::IndexCorruption(format!(
                        "snapshot stored at generation {} claims generation {}",
                        generation, snapshot.generation
                    )));
                }
                let graph = snapshot.graph;
                if graph.dimension() != config.dimension || graph.metric() != config.metric {
                    return Err(EngineError::IndexCorruption(format!(
                        "snapshot index is {}-d {} but {}-d {} is configured",
                        graph.dimension(),
                        graph.metric(),
                        config.dimension,
                        config.metric
                    )));
                }
                let state = IndexState::from_parts(
                    graph,
                    snapshot.allocator,
                    snapshot.documents,
                    snapshot.failures,
                    snapshot.generation,
                    snapshot.last_compaction,
                );
                state.verify()?;
                report.snapshot_generation = Some(generation);
                state
            }
            None => IndexState::new(config.clone()),
        };

        for (key, bytes) in self.store.read_log(state.generation())? {
            let record: LogRecord = bincode::deserialize(&bytes).map_err(|e| {
                EngineError::IndexCorruption(format!("undecodable log record {}: {}", key, e))
            })?;
            let expected = state.generation() + 1;
            if record.generation != key || key != expected {
                return Err(EngineError::IndexCorruption(format!(
                    "log gap: expected generation {}, found record {} under key {}",
                    expected, record.generation, key
                )));
            }
            state.apply(&record.batch).map_err(|e| {
                EngineError::IndexCorruption(format!("log record {} does not apply: {}", key, e))
            })?;
            report.replayed += 1;
        }
        if report.replayed > 0 {
            state.verify()?;
        }

        report.generation = state.generation();
        info!(
            snapshot = ?report.snapshot_generation,
            replayed = report.replayed,
            generation = report.generation,
            documents = state.documents().len(),
            "Loaded index state"
        );
        Ok((state, report))
    }
}
