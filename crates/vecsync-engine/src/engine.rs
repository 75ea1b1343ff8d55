//! The `SyncEngine` facade: open, search, status, reindex, compact, shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vecsync_embeddings::{
    model_from_settings, EmbeddingModel, EmbeddingPipeline, ModelInfo, PipelineConfig,
};
use vecsync_index::HnswConfig;
use vecsync_storage::{DurableStore, RocksStore, StorageError, StorageStats};
use vecsync_types::{FileEvent, Settings};

use crate::chunker::Chunker;
use crate::coordinator::{CompactionReport, Coordinator};
use crate::error::EngineError;
use crate::extract::ExtractorRegistry;
use crate::maintenance::spawn_maintenance;
use crate::persistence::{LoadReport, Persistence};
use crate::reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle};
use crate::scan::{plan_scan, supported_files};
use crate::search::{Query, SearchRequest, SearchResponse};
use crate::state::IndexState;
use crate::status::{StatusBoard, StatusReport};

/// Keeps a vector index in step with the watched folders and answers queries.
pub struct SyncEngine {
    settings: Settings,
    coordinator: Arc<Coordinator>,
    pipeline: Arc<EmbeddingPipeline>,
    status: Arc<StatusBoard>,
    extractors: ExtractorRegistry,
    reconciler: Option<Reconciler>,
    maintenance: Option<JoinHandle<()>>,
    sources: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    load_report: LoadReport,
}

impl SyncEngine {
    /// Open the RocksDB store at `settings.db_path` with the configured model,
    /// then scan the watch folders.
    pub async fn open(settings: Settings) -> Result<Self, EngineError> {
        settings.validate()?;
        let model = model_from_settings(&settings.embedding)?;
        let db_path = settings.expanded_db_path();
        std::fs::create_dir_all(&db_path)?;
        let store = Arc::new(RocksStore::open(&db_path)?);
        Self::with_parts(settings, model, store, false).await
    }

    /// Open the RocksDB store for writing without the initial watch-folder scan.
    pub async fn open_without_scan(settings: Settings) -> Result<Self, EngineError> {
        settings.validate()?;
        let model = model_from_settings(&settings.embedding)?;
        let db_path = settings.expanded_db_path();
        std::fs::create_dir_all(&db_path)?;
        let store = Arc::new(RocksStore::open(&db_path)?);
        Self::assemble(settings, model, store, false)
    }

    /// Open for queries only. Nothing is written and no events are accepted.
    pub async fn open_read_only(settings: Settings) -> Result<Self, EngineError> {
        settings.validate()?;
        let model = model_from_settings(&settings.embedding)?;
        let store = Arc::new(RocksStore::open_read_only(&settings.expanded_db_path())?);
        Self::with_parts(settings, model, store, true).await
    }

    /// Assemble an engine from an explicit model and store, then scan the
    /// watch folders unless read-only.
    pub async fn with_parts(
        settings: Settings,
        model: Arc<dyn EmbeddingModel>,
        store: Arc<dyn DurableStore>,
        read_only: bool,
    ) -> Result<Self, EngineError> {
        let engine = Self::assemble(settings, model, store, read_only)?;
        if !read_only {
            engine.scan().await?;
        }
        Ok(engine)
    }

    fn assemble(
        settings: Settings,
        model: Arc<dyn EmbeddingModel>,
        store: Arc<dyn DurableStore>,
        read_only: bool,
    ) -> Result<Self, EngineError> {
        let dimension = model.info().dimension;
        if dimension != settings.embedding.dimension {
            warn!(
                model = dimension,
                configured = settings.embedding.dimension,
                "Model dimension differs from configuration; using the model's"
            );
        }
        let hnsw = HnswConfig::from_settings(dimension, &settings.index);
        let persistence = Persistence::new(store);

        let (state, load_report) = match persistence.load(&hnsw) {
            Ok(loaded) => loaded,
            Err(EngineError::IndexCorruption(reason))
                if settings.rebuild_on_corruption
                    && !read_only
                    && !settings.watch_folders.is_empty() =>
            {
                error!(%reason, "Persisted index is corrupt; rebuilding from watch folders");
                persistence.clear()?;
                (IndexState::new(hnsw), LoadReport::default())
            }
            Err(e) => return Err(e),
        };

        let status = Arc::new(StatusBoard::new());
        status.seed(&state);

        let coordinator = Arc::new(Coordinator::new(
            state,
            persistence,
            settings.persistence.snapshot_every,
        ));
        let pipeline = Arc::new(EmbeddingPipeline::spawn(
            model,
            PipelineConfig {
                batch_size: settings.embedding.batch_size,
                batch_timeout: Duration::from_millis(settings.embedding.batch_timeout_ms),
                request_timeout: Duration::from_millis(settings.embedding.request_timeout_ms),
                queue_capacity: settings.reconciler.queue_capacity,
            },
        ));
        let extractors = ExtractorRegistry::with_plain_text(settings.supported_extensions());
        let cancel = CancellationToken::new();

        let (reconciler, maintenance) = if read_only {
            (None, None)
        } else {
            let reconciler = Reconciler::spawn(
                coordinator.clone(),
                pipeline.clone(),
                extractors.clone(),
                Chunker::from_settings(&settings.chunking),
                status.clone(),
                ReconcilerConfig::from_settings(&settings.reconciler),
            );
            let maintenance = spawn_maintenance(
                coordinator.clone(),
                settings.compaction.clone(),
                cancel.child_token(),
            );
            (Some(reconciler), Some(maintenance))
        };

        let engine = Self {
            settings,
            coordinator,
            pipeline,
            status,
            extractors,
            reconciler,
            maintenance,
            sources: Mutex::new(Vec::new()),
            cancel,
            load_report,
        };
        info!(
            read_only,
            dimension,
            generation = engine.coordinator.generation(),
            documents = engine.coordinator.read(|s| s.documents().len()),
            "Sync engine opened"
        );
        Ok(engine)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn model_info(&self) -> &ModelInfo {
        self.pipeline.info()
    }

    /// What was recovered from the store at open.
    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn is_read_only(&self) -> bool {
        self.reconciler.is_none()
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Event submission handle, absent when read-only.
    pub fn handle(&self) -> Option<ReconcilerHandle> {
        self.reconciler.as_ref().map(Reconciler::handle)
    }

    fn require_handle(&self) -> Result<ReconcilerHandle, EngineError> {
        self.handle()
            .ok_or(EngineError::Storage(StorageError::ReadOnly))
    }

    /// k-NN over live chunks, best first.
    ///
    /// A text query whose embedding fails on the model side (unreachable,
    /// timed out, malformed reply) yields an empty response, not an error.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, EngineError> {
        let k = request.k.unwrap_or(self.settings.search.default_k);
        let min_score = request.min_score.unwrap_or(self.settings.search.min_score);
        let vector = match request.query {
            Query::Vector(v) => v,
            Query::Text(text) => match self.pipeline.embed_query(&text).await {
                Ok(embedding) => embedding.into_values(),
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Query embedding failed; returning no results");
                    return Ok(SearchResponse {
                        hits: Vec::new(),
                        generation: self.coordinator.generation(),
                        widened: false,
                    });
                }
                Err(e) => return Err(e.into()),
            },
        };
        self.coordinator.search(
            &vector,
            k,
            self.settings.index.ef_search,
            self.settings.index.max_ef,
            request.filter.as_ref(),
            min_score,
        )
    }

    pub fn status(&self) -> StatusReport {
        let paths = self.status.entries();
        let pending_events = self.handle().map_or(0, |h| h.pending());
        let info = self.pipeline.info();
        self.coordinator.read(|s| StatusReport {
            paths,
            documents: s.documents().len(),
            live_chunks: s.live_chunks(),
            total_nodes: s.total_nodes(),
            tombstones: s.tombstone_count(),
            tombstone_fraction: s.tombstone_fraction(),
            generation: s.generation(),
            last_compaction: s.last_compaction(),
            dimension: s.graph().dimension(),
            metric: s.graph().metric(),
            model: info.name.clone(),
            pending_events,
        })
    }

    pub async fn submit(&self, event: FileEvent) -> Result<(), EngineError> {
        self.require_handle()?.submit(event).await
    }

    /// Forward events from an external source until it closes or the engine stops.
    pub fn attach_source(&self, mut rx: mpsc::Receiver<FileEvent>) -> Result<(), EngineError> {
        let handle = self.require_handle()?;
        let cancel = self.cancel.child_token();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(event) => {
                            if handle.submit(event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        self.sources.lock().push(task);
        Ok(())
    }

    /// Walk the watch folders: enqueue every supported file, and a deletion
    /// for every indexed document whose file is gone. Returns events queued.
    pub async fn scan(&self) -> Result<usize, EngineError> {
        let handle = self.require_handle()?;
        let roots = self.settings.expanded_watch_folders();
        let indexed: Vec<PathBuf> = self.coordinator.read(|s| s.tracked_paths().cloned().collect());
        let extractors = self.extractors.clone();
        let plan = tokio::task::spawn_blocking(move || {
            plan_scan(&roots, &extractors, indexed.iter().map(PathBuf::as_path))
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?;

        for path in &plan.removals {
            handle.submit(FileEvent::deleted(path)).await?;
        }
        for path in &plan.upserts {
            handle.submit(FileEvent::modified(path)).await?;
        }
        info!(
            upserts = plan.upserts.len(),
            removals = plan.removals.len(),
            "Queued scan results"
        );
        Ok(plan.len())
    }

    /// Re-enqueue paths (directories expand to their supported files), or
    /// rescan every watch folder when `paths` is `None`.
    pub async fn reindex(&self, paths: Option<Vec<PathBuf>>) -> Result<usize, EngineError> {
        let Some(paths) = paths else {
            return self.scan().await;
        };
        let handle = self.require_handle()?;
        let mut queued = 0;
        for path in paths {
            let targets = if path.is_dir() {
                let extractors = self.extractors.clone();
                tokio::task::spawn_blocking(move || supported_files(&path, &extractors))
                    .await
                    .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
            } else {
                vec![path]
            };
            for target in targets {
                handle.submit(FileEvent::modified(target)).await?;
                queued += 1;
            }
        }
        info!(queued, "Reindex requested");
        Ok(queued)
    }

    /// Resolve once every accepted event has been processed.
    pub async fn wait_idle(&self) {
        if let Some(handle) = self.handle() {
            handle.wait_idle().await;
        }
    }

    pub async fn compact(&self) -> Result<CompactionReport, EngineError> {
        self.require_handle()?;
        self.coordinator.compact().await
    }

    /// Snapshot now; returns the snapshot generation.
    pub async fn snapshot(&self) -> Result<u64, EngineError> {
        self.require_handle()?;
        self.coordinator.snapshot().await
    }

    pub fn storage_stats(&self) -> Result<StorageStats, EngineError> {
        self.coordinator.persistence().stats()
    }

    /// Stop background work, let in-flight jobs finish and write a final snapshot.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        info!("Shutting down sync engine");
        self.cancel.cancel();

        let sources = std::mem::take(&mut *self.sources.lock());
        for task in sources {
            if let Err(e) = task.await {
                warn!(error = %e, "Event source task failed");
            }
        }
        let read_only = self.reconciler.is_none();
        if let Some(reconciler) = self.reconciler {
            reconciler.shutdown().await;
        }
        if let Some(maintenance) = self.maintenance {
            if let Err(e) = maintenance.await {
                warn!(error = %e, "Maintenance task failed");
            }
        }

        if !read_only {
            self.coordinator.snapshot_if_dirty().await?;
            self.coordinator.persistence().store().flush()?;
        }
        match Arc::try_unwrap(self.pipeline) {
            Ok(pipeline) => pipeline.shutdown().await,
            Err(_) => warn!("Embedding pipeline still shared at shutdown"),
        }
        info!("Sync engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::PathFilter;
    use tempfile::TempDir;
    use vecsync_embeddings::HashingEmbedder;
    use vecsync_storage::MemoryStore;
    use vecsync_types::PathState;

    const DIM: usize = 128;

    fn settings(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.watch_folders = vec![dir.path().to_string_lossy().into_owned()];
        settings.embedding.dimension = DIM;
        settings.embedding.batch_timeout_ms = 5;
        settings.reconciler.initial_backoff_ms = 1;
        settings.reconciler.max_backoff_ms = 5;
        settings
    }

    async fn engine(dir: &TempDir, store: Arc<MemoryStore>) -> SyncEngine {
        let model = Arc::new(HashingEmbedder::new(DIM).unwrap());
        SyncEngine::with_parts(settings(dir), model, store, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_scans_existing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha beta").unwrap();
        std::fs::write(dir.path().join("b.md"), "gamma delta").unwrap();
        std::fs::write(dir.path().join("c.bin"), "ignored").unwrap();

        let engine = engine(&dir, Arc::new(MemoryStore::new())).await;
        engine.wait_idle().await;

        let status = engine.status();
        assert_eq!(status.documents, 2);
        assert_eq!(status.count(PathState::Indexed), 2);
        assert_eq!(status.dimension, DIM);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_text_search_with_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("x")).unwrap();
        std::fs::create_dir(dir.path().join("y")).unwrap();
        std::fs::write(dir.path().join("x/a.txt"), "alpha beta").unwrap();
        std::fs::write(dir.path().join("y/b.txt"), "alpha gamma").unwrap();

        let engine = engine(&dir, Arc::new(MemoryStore::new())).await;
        engine.wait_idle().await;

        let all = engine.search(SearchRequest::text("alpha")).await.unwrap();
        assert_eq!(all.hits.len(), 2);

        let only_y = engine
            .search(SearchRequest::text("alpha").with_filter(PathFilter::prefix(dir.path().join("y"))))
            .await
            .unwrap();
        assert_eq!(only_y.hits.len(), 1);
        assert_eq!(only_y.hits[0].path, dir.path().join("y/b.txt"));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reindex_directory_is_hash_checked() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let engine = engine(&dir, Arc::new(MemoryStore::new())).await;
        engine.wait_idle().await;
        let generation = engine.status().generation;

        let queued = engine
            .reindex(Some(vec![dir.path().to_path_buf()]))
            .await
            .unwrap();
        engine.wait_idle().await;
        assert_eq!(queued, 1);
        assert_eq!(engine.status().generation, generation);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_removes_vanished_documents_on_reopen() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "alpha").unwrap();

        let first = engine(&dir, store.clone()).await;
        first.wait_idle().await;
        first.shutdown().await.unwrap();

        std::fs::remove_file(&path).unwrap();
        let second = engine(&dir, store).await;
        second.wait_idle().await;
        assert_eq!(second.status().state_of(&path), Some(PathState::Deleted));
        assert_eq!(second.status().live_chunks, 0);
        second.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_store_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.save_snapshot(3, b"garbage").unwrap();

        let engine = engine(&dir, store).await;
        engine.wait_idle().await;
        assert_eq!(engine.status().documents, 1);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_store_without_rebuild_fails() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.save_snapshot(3, b"garbage").unwrap();
        let mut settings = settings(&dir);
        settings.rebuild_on_corruption = false;
        let model = Arc::new(HashingEmbedder::new(DIM).unwrap());

        let result = SyncEngine::with_parts(settings, model, store, false).await;
        assert!(matches!(result, Err(EngineError::IndexCorruption(_))));
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(HashingEmbedder::new(DIM).unwrap());
        let engine = SyncEngine::with_parts(settings(&dir), model, Arc::new(MemoryStore::new()), true)
            .await
            .unwrap();
        assert!(engine.is_read_only());
        assert!(engine.submit(FileEvent::created("/a.txt")).await.is_err());
        assert!(engine.compact().await.is_err());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_without_scan_defers_indexing() {
        let dir = TempDir::new().unwrap();
        let db = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha beta").unwrap();
        let mut settings = settings(&dir);
        settings.db_path = db.path().join("db").to_string_lossy().into_owned();

        let engine = SyncEngine::open_without_scan(settings).await.unwrap();
        engine.wait_idle().await;
        assert_eq!(engine.status().documents, 0);

        assert_eq!(engine.reindex(None).await.unwrap(), 1);
        engine.wait_idle().await;
        assert_eq!(engine.status().documents, 1);
        engine.shutdown().await.unwrap();
    }
}
