//! Per-path status tracking and the engine status report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use vecsync_types::{DistanceMetric, PathState, PathStatus};

use crate::state::IndexState;

/// Latest status of every path the engine has heard about.
#[derive(Debug, Default)]
pub struct StatusBoard {
    entries: DashMap<PathBuf, PathStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load what the index state remembers: indexed documents and
    /// excluded failures.
    pub fn seed(&self, state: &IndexState) {
        for doc in state.documents().values() {
            self.entries
                .insert(doc.path.clone(), PathStatus::indexed(doc.chunks.len()));
        }
        for (path, failure) in state.failures() {
            self.entries.insert(path.clone(), failure.status());
        }
    }

    pub fn set(&self, path: &Path, status: PathStatus) {
        self.entries.insert(path.to_path_buf(), status);
    }

    /// Event accepted; live chunks stay searchable until the next commit.
    pub fn mark_pending(&self, path: &Path) {
        let chunks = self.entries.get(path).map_or(0, |s| s.chunks);
        self.entries.insert(
            path.to_path_buf(),
            PathStatus {
                chunks,
                ..PathStatus::pending()
            },
        );
    }

    pub fn get(&self, path: &Path) -> Option<PathStatus> {
        self.entries.get(path).map(|s| s.clone())
    }

    pub fn state(&self, path: &Path) -> Option<PathState> {
        self.entries.get(path).map(|s| s.state)
    }

    pub fn count(&self, state: PathState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    /// Ordered copy of all entries.
    pub fn entries(&self) -> BTreeMap<PathBuf, PathStatus> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Snapshot of the engine's state for the `status` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub paths: BTreeMap<PathBuf, PathStatus>,
    pub documents: usize,
    pub live_chunks: usize,
    /// Nodes in the graph, tombstoned ones included
    pub total_nodes: usize,
    pub tombstones: usize,
    pub tombstone_fraction: f32,
    pub generation: u64,
    pub last_compaction: Option<DateTime<Utc>>,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub model: String,
    /// Events accepted but not yet finished
    pub pending_events: usize,
}

impl StatusReport {
    pub fn state_of(&self, path: &Path) -> Option<PathState> {
        self.paths.get(path).map(|s| s.state)
    }

    pub fn count(&self, state: PathState) -> usize {
        self.paths.values().filter(|s| s.state == state).count()
    }
}
