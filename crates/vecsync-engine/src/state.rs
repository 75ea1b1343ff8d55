//! In-memory index state and the commit batches that mutate it.
//!
//! `IndexState` owns the graph, the id allocator, the document table and the
//! table of paths excluded after failing permanently.
//! Every mutation goes through [`IndexState::apply`], which is validated up
//! front so that a batch is either applied completely or not at all.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vecsync_index::{score, CompactionPlan, HnswConfig, HnswGraph, IdAllocator, InsertPlan};
use vecsync_types::{ChunkKey, ChunkRecord, DocumentRecord, NodeId, PathStatus};

use crate::error::EngineError;
use crate::search::{PathFilter, SearchHit, SearchResponse};

/// A chunk whose embedding has been computed, ready to become a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedChunk {
    pub offset: u32,
    pub start: usize,
    pub end: usize,
    pub vector: Vec<f32>,
}

/// Why a document's chunks are being removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// The file is gone
    Deleted,
    /// Indexing failed permanently; excluded until the next event
    Excluded { attempts: u32, error: String },
}

impl RemovalReason {
    pub fn excluded(attempts: u32, error: impl Into<String>) -> Self {
        RemovalReason::Excluded {
            attempts,
            error: error.into(),
        }
    }
}

/// A path excluded after its last event failed permanently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn status(&self) -> PathStatus {
        PathStatus {
            updated_at: self.failed_at,
            ..PathStatus::failed(self.attempts, self.error.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Replace the document's chunk set
    Replace {
        content_hash: String,
        modified_at: Option<DateTime<Utc>>,
        chunks: Vec<PreparedChunk>,
    },
    /// Drop the document and tombstone its chunks
    Remove { reason: RemovalReason },
}

/// The unit of atomic mutation: one document's replacement or removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBatch {
    pub path: PathBuf,
    pub kind: BatchKind,
    pub committed_at: DateTime<Utc>,
}

impl CommitBatch {
    pub fn replace(
        path: impl Into<PathBuf>,
        content_hash: impl Into<String>,
        modified_at: Option<DateTime<Utc>>,
        chunks: Vec<PreparedChunk>,
    ) -> Self {
        Self {
            path: path.into(),
            kind: BatchKind::Replace {
                content_hash: content_hash.into(),
                modified_at,
                chunks,
            },
            committed_at: Utc::now(),
        }
    }

    pub fn remove(path: impl Into<PathBuf>, reason: RemovalReason) -> Self {
        Self {
            path: path.into(),
            kind: BatchKind::Remove { reason },
            committed_at: Utc::now(),
        }
    }

    /// Number of nodes the batch will insert.
    pub fn new_nodes(&self) -> usize {
        match &self.kind {
            BatchKind::Replace { chunks, .. } => chunks.len(),
            BatchKind::Remove { .. } => 0,
        }
    }
}

/// A batch whose neighbor searches are done, waiting to be published.
#[derive(Debug)]
pub struct PreparedBatch {
    /// Generation the batch was prepared against
    generation: u64,
    ids: Vec<NodeId>,
    plan: Option<InsertPlan>,
}

/// Result of rebuilding the graph without tombstones, not yet installed.
#[derive(Debug)]
pub struct PreparedCompaction {
    pub plan: CompactionPlan,
    pub graph: HnswGraph,
    /// Generation the rebuild was computed from
    pub generation: u64,
}

/// Graph, allocator, document table and failure table.
#[derive(Debug, Clone)]
pub struct IndexState {
    graph: HnswGraph,
    allocator: IdAllocator,
    documents: BTreeMap<PathBuf, DocumentRecord>,
    failures: BTreeMap<PathBuf, FailureRecord>,
    /// Live node -> owning chunk; derived from `documents`
    node_owner: HashMap<NodeId, ChunkKey>,
    generation: u64,
    last_compaction: Option<DateTime<Utc>>,
}

impl IndexState {
    pub fn new(config: HnswConfig) -> Self {
        Self {
            graph: HnswGraph::new(config),
            allocator: IdAllocator::new(),
            documents: BTreeMap::new(),
            failures: BTreeMap::new(),
            node_owner: HashMap::new(),
            generation: 0,
            last_compaction: None,
        }
    }

    /// Reassemble state from persisted parts. Call [`verify`](Self::verify)
    /// before trusting it.
    pub fn from_parts(
        graph: HnswGraph,
        allocator: IdAllocator,
        documents: BTreeMap<PathBuf, DocumentRecord>,
        failures: BTreeMap<PathBuf, FailureRecord>,
        generation: u64,
        last_compaction: Option<DateTime<Utc>>,
    ) -> Self {
        let node_owner = owner_map(&documents);
        Self {
            graph,
            allocator,
            documents,
            failures,
            node_owner,
            generation,
            last_compaction,
        }
    }

    pub fn graph(&self) -> &HnswGraph {
        &self.graph
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    pub fn documents(&self) -> &BTreeMap<PathBuf, DocumentRecord> {
        &self.documents
    }

    pub fn document(&self, path: &Path) -> Option<&DocumentRecord> {
        self.documents.get(path)
    }

    pub fn failures(&self) -> &BTreeMap<PathBuf, FailureRecord> {
        &self.failures
    }

    pub fn failure(&self, path: &Path) -> Option<&FailureRecord> {
        self.failures.get(path)
    }

    /// Paths the state knows about: indexed documents and excluded failures.
    pub fn tracked_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.documents.keys().chain(self.failures.keys())
    }

    /// Whether applying `batch` would change nothing but the generation.
    pub fn is_noop(&self, batch: &CommitBatch) -> bool {
        matches!(
            batch.kind,
            BatchKind::Remove {
                reason: RemovalReason::Deleted
            }
        ) && !self.documents.contains_key(&batch.path)
            && !self.failures.contains_key(&batch.path)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_compaction(&self) -> Option<DateTime<Utc>> {
        self.last_compaction
    }

    pub fn live_chunks(&self) -> usize {
        self.node_owner.len()
    }

    pub fn total_nodes(&self) -> usize {
        self.graph.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.allocator.tombstone_count()
    }

    pub fn tombstone_fraction(&self) -> f32 {
        self.allocator.tombstone_fraction()
    }

    /// Chunk owning a live node.
    pub fn owner(&self, node_id: NodeId) -> Option<&ChunkKey> {
        self.node_owner.get(&node_id)
    }

    /// Check a batch can be applied without touching any state.
    pub fn validate(&self, batch: &CommitBatch) -> Result<(), EngineError> {
        let BatchKind::Replace { chunks, .. } = &batch.kind else {
            return Ok(());
        };
        let dimension = self.graph.dimension();
        for chunk in chunks {
            if chunk.vector.len() != dimension {
                return Err(vecsync_index::IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: chunk.vector.len(),
                }
                .into());
            }
        }
        let available = self.allocator.free_list().len() as u64
            + (NodeId::MAX - self.allocator.high_water()) as u64;
        if chunks.len() as u64 > available {
            return Err(vecsync_index::IndexError::IdsExhausted.into());
        }
        let mut offsets = BTreeSet::new();
        if let Some(dup) = chunks.iter().find(|c| !offsets.insert(c.offset)) {
            return Err(EngineError::IndexCorruption(format!(
                "batch for {} repeats chunk offset {}",
                batch.path.display(),
                dup.offset
            )));
        }
        Ok(())
    }

    /// Apply a batch and advance the generation. Returns the new generation.
    pub fn apply(&mut self, batch: &CommitBatch) -> Result<u64, EngineError> {
        let prepared = self.prepare(batch)?;
        self.publish(batch, prepared)
    }

    /// Validate a batch and plan its graph insertions without changing
    /// anything. Only needs shared access.
    pub fn prepare(&self, batch: &CommitBatch) -> Result<PreparedBatch, EngineError> {
        self.validate(batch)?;
        let (ids, plan) = match &batch.kind {
            BatchKind::Replace { chunks, .. } if !chunks.is_empty() => {
                let ids = self.allocator.peek(chunks.len())?;
                let items = ids
                    .iter()
                    .copied()
                    .zip(chunks.iter().map(|c| c.vector.clone()))
                    .collect();
                (ids, Some(self.graph.plan_insert(items)?))
            }
            _ => (Vec::new(), None),
        };
        Ok(PreparedBatch {
            generation: self.generation,
            ids,
            plan,
        })
    }

    /// Install a prepared batch and advance the generation.
    ///
    /// Everything that can fail is checked before the first mutation, so a
    /// rejected batch leaves the state untouched.
    pub fn publish(&mut self, batch: &CommitBatch, prepared: PreparedBatch) -> Result<u64, EngineError> {
        if prepared.generation != self.generation {
            return Err(EngineError::IndexCorruption(format!(
                "batch for {} prepared at generation {} published at {}",
                batch.path.display(),
                prepared.generation,
                self.generation
            )));
        }
        if self.allocator.peek(prepared.ids.len())? != prepared.ids {
            return Err(EngineError::IndexCorruption(format!(
                "batch for {} planned ids the allocator no longer offers",
                batch.path.display()
            )));
        }
        if let Some(plan) = prepared.plan {
            self.graph.apply_insert(plan)?;
        }

        self.failures.remove(&batch.path);
        if let Some(old) = self.documents.remove(&batch.path) {
            for node_id in old.node_ids() {
                // Already logged by the allocator; a stale id must not stop the batch
                let _ = self.allocator.tombstone(node_id);
                self.node_owner.remove(&node_id);
            }
            debug!(
                path = %batch.path.display(),
                tombstoned = old.chunks.len(),
                "Tombstoned superseded chunks"
            );
        }

        match &batch.kind {
            BatchKind::Replace {
                content_hash,
                modified_at,
                chunks,
            } => {
                let mut records = Vec::with_capacity(chunks.len());
                for (chunk, &node_id) in chunks.iter().zip(&prepared.ids) {
                    self.allocator.allocate()?;
                    let key = ChunkKey::new(batch.path.clone(), chunk.offset);
                    self.node_owner.insert(node_id, key.clone());
                    records.push(ChunkRecord::new(key, chunk.start, chunk.end, node_id));
                }
                records.sort_by_key(|r| r.key.offset);
                let mut record = DocumentRecord::new(
                    batch.path.clone(),
                    content_hash.clone(),
                    *modified_at,
                    records,
                );
                record.indexed_at = batch.committed_at;
                self.documents.insert(batch.path.clone(), record);
            }
            BatchKind::Remove {
                reason: RemovalReason::Excluded { attempts, error },
            } => {
                self.failures.insert(
                    batch.path.clone(),
                    FailureRecord {
                        attempts: *attempts,
                        error: error.clone(),
                        failed_at: batch.committed_at,
                    },
                );
            }
            BatchKind::Remove {
                reason: RemovalReason::Deleted,
            } => {}
        }

        self.generation += 1;
        Ok(self.generation)
    }

    /// Filtered k-NN over live chunks.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        max_ef: usize,
        filter: Option<&PathFilter>,
        min_score: f32,
    ) -> Result<SearchResponse, EngineError> {
        let accept = |id: NodeId| {
            self.allocator.is_live(id)
                && self
                    .node_owner
                    .get(&id)
                    .is_some_and(|key| filter.map_or(true, |f| f.matches(&key.path)))
        };
        let found = self.graph.search(query, k, ef, max_ef, accept)?;

        let metric = self.graph.metric();
        let hits = found
            .hits
            .iter()
            .filter_map(|n| {
                let key = self.node_owner.get(&n.node_id)?;
                let chunk = self
                    .documents
                    .get(&key.path)?
                    .chunks
                    .iter()
                    .find(|c| c.node_id == n.node_id)?;
                Some(SearchHit {
                    path: key.path.clone(),
                    offset: key.offset,
                    score: score(metric, n.distance),
                    node_id: n.node_id,
                    start: chunk.start,
                    end: chunk.end,
                })
            })
            .filter(|hit| hit.score > min_score)
            .collect();

        Ok(SearchResponse {
            hits,
            generation: self.generation,
            widened: found.widened,
        })
    }

    /// Build the compacted graph without modifying the state.
    pub fn prepare_compaction(&self) -> Result<PreparedCompaction, EngineError> {
        let plan = self.allocator.plan_compaction();
        let graph = self.graph.rebuild(&plan.remap)?;
        Ok(PreparedCompaction {
            plan,
            graph,
            generation: self.generation,
        })
    }

    /// Swap in a compacted graph and renumber every chunk.
    pub fn install_compaction(&mut self, prepared: PreparedCompaction) -> Result<(), EngineError> {
        if prepared.generation != self.generation {
            return Err(EngineError::IndexCorruption(format!(
                "compaction prepared at generation {} installed at {}",
                prepared.generation, self.generation
            )));
        }
        let remap = &prepared.plan.remap;
        if let Some(stray) = self
            .documents
            .values()
            .flat_map(|d| d.node_ids())
            .find(|id| !remap.contains_key(id))
        {
            return Err(EngineError::IndexCorruption(format!(
                "live chunk node {} missing from compaction plan",
                stray
            )));
        }

        self.allocator.apply_compaction(&prepared.plan);
        self.graph = prepared.graph;
        for doc in self.documents.values_mut() {
            for chunk in &mut doc.chunks {
                chunk.node_id = remap[&chunk.node_id];
            }
        }
        self.node_owner = owner_map(&self.documents);
        self.last_compaction = Some(Utc::now());
        Ok(())
    }

    /// Check every cross-structure invariant.
    pub fn verify(&self) -> Result<(), EngineError> {
        let corrupt = |msg: String| EngineError::IndexCorruption(msg);

        self.graph.verify().map_err(|e| corrupt(e.to_string()))?;
        let graph_ids: BTreeSet<NodeId> = self.graph.node_ids().collect();
        self.allocator
            .verify(&graph_ids)
            .map_err(|e| corrupt(e.to_string()))?;

        if let Some(path) = self.failures.keys().find(|p| self.documents.contains_key(*p)) {
            return Err(corrupt(format!(
                "{} is both indexed and excluded",
                path.display()
            )));
        }

        let mut seen = BTreeSet::new();
        for (path, doc) in &self.documents {
            if &doc.path != path {
                return Err(corrupt(format!(
                    "document keyed {} records path {}",
                    path.display(),
                    doc.path.display()
                )));
            }
            for chunk in &doc.chunks {
                if &chunk.key.path != path {
                    return Err(corrupt(format!("chunk {} filed under {}", chunk.key, path.display())));
                }
                if !self.graph.contains(chunk.node_id) {
                    return Err(corrupt(format!(
                        "dangling chunk {} -> missing node {}",
                        chunk.key, chunk.node_id
                    )));
                }
                if !self.allocator.is_live(chunk.node_id) {
                    return Err(corrupt(format!(
                        "chunk {} points at tombstoned node {}",
                        chunk.key, chunk.node_id
                    )));
                }
                if !seen.insert(chunk.node_id) {
                    return Err(corrupt(format!("node {} owned by two chunks", chunk.node_id)));
                }
            }
        }

        let live = self.allocator.live_count();
        if live != seen.len() {
            return Err(corrupt(format!(
                "{} live nodes but {} live chunks",
                live,
                seen.len()
            )));
        }
        if self.node_owner.len() != seen.len() {
            warn!(
                owners = self.node_owner.len(),
                chunks = seen.len(),
                "Owner map out of step with documents"
            );
            return Err(corrupt("owner map out of step with documents".to_string()));
        }
        Ok(())
    }
}

fn owner_map(documents: &BTreeMap<PathBuf, DocumentRecord>) -> HashMap<NodeId, ChunkKey> {
    documents
        .values()
        .flat_map(|d| d.chunks.iter())
        .map(|c| (c.node_id, c.key.clone()))
        .collect()
}
