//! Single-writer commit path and shared read access to the index state.
//!
//! Writers serialize on an async mutex that is held for one commit batch
//! or one compaction. The state itself sits behind a reader-writer lock:
//! searches take it shared, and so do a commit's neighbor searches and a
//! compaction's rebuild. Only publishing a prepared batch and swapping in a
//! compacted graph take it exclusively.
//! Lock guards on the state are never held across an await point.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vecsync_index::IndexError;
use vecsync_types::CompactionSettings;

use crate::error::EngineError;
use crate::persistence::Persistence;
use crate::search::{PathFilter, SearchResponse};
use crate::state::{CommitBatch, IndexState};

/// Lifecycle of one commit batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Pending,
    Committing,
    Committed,
    Aborted,
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitState::Pending => write!(f, "pending"),
            CommitState::Committing => write!(f, "committing"),
            CommitState::Committed => write!(f, "committed"),
            CommitState::Aborted => write!(f, "aborted"),
        }
    }
}

/// How a commit request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Applied; the state is now at `generation`
    Committed { generation: u64 },
    /// A newer event for the path was assigned after this one
    Superseded,
    /// Nothing to do (deletion of a path the index does not track)
    Unchanged,
}

/// Monotonic sequence numbers, latest one per path.
///
/// Last writer wins per path by sequence number, not by the order in which
/// embedding work happens to finish.
#[derive(Debug, Default)]
pub struct SequenceBoard {
    counter: AtomicU64,
    latest: DashMap<PathBuf, u64>,
}

impl SequenceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number to `path`, superseding earlier ones.
    pub fn assign(&self, path: &Path) -> u64 {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest.insert(path.to_path_buf(), seq);
        seq
    }

    pub fn is_current(&self, path: &Path, seq: u64) -> bool {
        self.latest.get(path).is_some_and(|latest| *latest == seq)
    }

    pub fn latest(&self, path: &Path) -> Option<u64> {
        self.latest.get(path).map(|s| *s)
    }
}

/// Outcome of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Tombstoned nodes dropped from the graph
    pub reclaimed: usize,
    /// Nodes in the rebuilt graph
    pub live: usize,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct WriterState {
    commits_since_snapshot: u64,
}

/// Owns the index state and serializes every mutation of it.
pub struct Coordinator {
    state: RwLock<IndexState>,
    writer: Mutex<WriterState>,
    sequences: SequenceBoard,
    persistence: Persistence,
    compacting: AtomicBool,
    snapshot_every: u64,
}

impl Coordinator {
    /// `snapshot_every` commits trigger a snapshot; 0 disables automatic snapshots.
    pub fn new(state: IndexState, persistence: Persistence, snapshot_every: u64) -> Self {
        Self {
            state: RwLock::new(state),
            writer: Mutex::new(WriterState::default()),
            sequences: SequenceBoard::new(),
            persistence,
            compacting: AtomicBool::new(false),
            snapshot_every,
        }
    }

    pub fn sequences(&self) -> &SequenceBoard {
        &self.sequences
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// Run `f` against a consistent view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&IndexState) -> R) -> R {
        f(&self.state.read())
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation()
    }

    pub fn last_compaction(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_compaction()
    }

    /// Filtered k-NN under a shared lock.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        max_ef: usize,
        filter: Option<&PathFilter>,
        min_score: f32,
    ) -> Result<SearchResponse, EngineError> {
        self.state
            .read()
            .search(query, k, ef, max_ef, filter, min_score)
    }

    async fn lock_writer(&self) -> tokio::sync::MutexGuard<'_, WriterState> {
        match self.writer.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if self.compacting.load(Ordering::Acquire) {
                    debug!(reason = %IndexError::ConcurrencyViolation, "Commit waiting for compaction");
                }
                self.writer.lock().await
            }
        }
    }

    /// Commit a batch produced for the event that was assigned `seq`.
    ///
    /// The record is appended to the log before the in-memory state changes;
    /// readers see either none or all of the batch.
    pub async fn commit(&self, seq: u64, batch: CommitBatch) -> Result<CommitOutcome, EngineError> {
        let path = batch.path.clone();
        debug!(path = %path.display(), seq, state = %CommitState::Pending, "Commit requested");

        let mut writer = self.lock_writer().await;

        if !self.sequences.is_current(&path, seq) {
            debug!(
                path = %path.display(),
                seq,
                latest = ?self.sequences.latest(&path),
                state = %CommitState::Aborted,
                "Commit superseded by newer event"
            );
            return Ok(CommitOutcome::Superseded);
        }

        // Neighbor searches run under the shared lock; readers keep going
        let (generation, prepared) = {
            let state = self.state.read();
            if state.is_noop(&batch) {
                return Ok(CommitOutcome::Unchanged);
            }
            match state.prepare(&batch) {
                Ok(prepared) => (state.generation() + 1, prepared),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, state = %CommitState::Aborted, "Commit rejected");
                    return Err(e);
                }
            }
        };

        debug!(path = %path.display(), generation, state = %CommitState::Committing, "Committing batch");
        if let Err(e) = self.persistence.append(generation, &batch) {
            error!(path = %path.display(), generation, error = %e, state = %CommitState::Aborted, "Commit log append failed");
            return Err(e);
        }

        let applied = self.state.write().publish(&batch, prepared);
        let applied = match applied {
            Ok(g) => g,
            Err(e) => {
                error!(path = %path.display(), generation, error = %e, "Logged batch failed to apply");
                return Err(EngineError::IndexCorruption(format!(
                    "logged batch {} failed to apply: {}",
                    generation, e
                )));
            }
        };
        debug!(
            path = %path.display(),
            generation = applied,
            new_nodes = batch.new_nodes(),
            state = %CommitState::Committed,
            "Batch committed"
        );

        writer.commits_since_snapshot += 1;
        if self.snapshot_every > 0 && writer.commits_since_snapshot >= self.snapshot_every {
            self.snapshot_locked(&mut writer)?;
        }

        Ok(CommitOutcome::Committed {
            generation: applied,
        })
    }

    fn snapshot_locked(&self, writer: &mut WriterState) -> Result<u64, EngineError> {
        let (generation, blob) = {
            let state = self.state.read();
            (state.generation(), Persistence::encode_snapshot(&state)?)
        };
        self.persistence.write_snapshot(generation, &blob)?;
        writer.commits_since_snapshot = 0;
        Ok(generation)
    }

    /// Write a snapshot of the current state and truncate the log.
    pub async fn snapshot(&self) -> Result<u64, EngineError> {
        let mut writer = self.writer.lock().await;
        self.snapshot_locked(&mut writer)
    }

    /// Snapshot only if commits were logged since the last one.
    pub async fn snapshot_if_dirty(&self) -> Result<Option<u64>, EngineError> {
        let mut writer = self.writer.lock().await;
        if writer.commits_since_snapshot == 0 {
            return Ok(None);
        }
        self.snapshot_locked(&mut writer).map(Some)
    }

    /// Commits appended to the log since the last snapshot.
    pub async fn pending_log_records(&self) -> u64 {
        self.writer.lock().await.commits_since_snapshot
    }

    pub fn should_compact(&self, settings: &CompactionSettings) -> bool {
        let state = self.state.read();
        settings.should_compact(state.tombstone_count(), state.total_nodes())
    }

    /// Rebuild the graph without tombstoned nodes and swap it in.
    ///
    /// The rebuild runs under a shared lock so searches continue; only the
    /// swap is exclusive. A snapshot follows so the log never references the
    /// pre-compaction numbering, then the store reclaims the truncated log.
    pub async fn compact(&self) -> Result<CompactionReport, EngineError> {
        let mut writer = self.writer.lock().await;

        let tombstones = self.state.read().tombstone_count();
        if tombstones == 0 {
            let state = self.state.read();
            debug!("Nothing to compact");
            return Ok(CompactionReport {
                reclaimed: 0,
                live: state.total_nodes(),
                generation: state.generation(),
            });
        }

        self.compacting.store(true, Ordering::Release);
        let result = self.compact_locked(&mut writer);
        self.compacting.store(false, Ordering::Release);
        result
    }

    fn compact_locked(&self, writer: &mut WriterState) -> Result<CompactionReport, EngineError> {
        info!("Starting index compaction");
        let prepared = self.state.read().prepare_compaction()?;
        let report = CompactionReport {
            reclaimed: prepared.plan.reclaimed,
            live: prepared.plan.live(),
            generation: prepared.generation,
        };
        self.state.write().install_compaction(prepared)?;
        info!(
            reclaimed = report.reclaimed,
            live = report.live,
            generation = report.generation,
            "Index compaction complete"
        );
        self.snapshot_locked(writer)?;
        if let Err(e) = self.persistence.compact_storage() {
            warn!(error = %e, "Storage compaction after snapshot failed");
        }
        Ok(report)
    }
}
