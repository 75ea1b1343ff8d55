//! End-to-end test infrastructure for vecsync.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the full file-event-to-query pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vecsync_embeddings::HashingEmbedder;
use vecsync_engine::{SearchRequest, SearchResponse, SyncEngine};
use vecsync_storage::{DurableStore, MemoryStore};
use vecsync_types::Settings;

/// Embedding width used by every E2E test.
pub const DIM: usize = 128;

/// Shared test harness for E2E tests.
///
/// Owns a temp directory with a `watch/` folder that the engine scans, and
/// the durable store engines are opened against.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Folder the engine watches
    pub watch_dir: PathBuf,
    /// Store shared by every engine the harness opens
    pub store: Arc<dyn DurableStore>,
    pub settings: Settings,
}

impl TestHarness {
    /// Harness backed by an in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn DurableStore>) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let watch_dir = temp_dir.path().join("watch");
        std::fs::create_dir_all(&watch_dir).expect("Failed to create watch dir");
        let settings = test_settings(&watch_dir, temp_dir.path());

        Self {
            _temp_dir: temp_dir,
            watch_dir,
            store,
            settings,
        }
    }

    /// Scratch space outside the watch folder.
    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Open an engine over the harness store with the hashing embedder.
    /// The watch folder is scanned before this returns.
    pub async fn open(&self) -> SyncEngine {
        self.open_with(self.store.clone()).await
    }

    /// Open an engine over a different store, e.g. a RocksDB instance that
    /// is reopened between runs.
    pub async fn open_with(&self, store: Arc<dyn DurableStore>) -> SyncEngine {
        let model = Arc::new(HashingEmbedder::new(DIM).expect("Failed to build embedder"));
        SyncEngine::with_parts(self.settings.clone(), model, store, false)
            .await
            .expect("Failed to open engine")
    }

    /// Open and wait until the initial scan has been reconciled.
    pub async fn open_idle(&self) -> SyncEngine {
        let engine = self.open().await;
        engine.wait_idle().await;
        engine
    }

    /// Absolute path of a file in the watch folder.
    pub fn path(&self, name: &str) -> PathBuf {
        self.watch_dir.join(name)
    }

    /// Write a file in the watch folder, creating parent folders.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn remove(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::remove_file(&path).expect("Failed to remove file");
        path
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings tuned for fast tests: small batches, tiny backoff, no
/// background compaction.
pub fn test_settings(watch_dir: &Path, root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.db_path = root.join("db").to_string_lossy().into_owned();
    settings.watch_folders = vec![watch_dir.to_string_lossy().into_owned()];
    settings.embedding.dimension = DIM;
    settings.embedding.batch_timeout_ms = 5;
    settings.reconciler.debounce_ms = 50;
    settings.reconciler.max_attempts = 3;
    settings.reconciler.initial_backoff_ms = 1;
    settings.reconciler.max_backoff_ms = 5;
    settings.compaction.check_interval_secs = 3600;
    settings
}

/// Embedding the engine stores for `text`.
pub fn embed(text: &str) -> Vec<f32> {
    HashingEmbedder::new(DIM)
        .expect("Failed to build embedder")
        .embed_text(text)
        .into_values()
}

/// Run a text query and return the response.
pub async fn search_text(engine: &SyncEngine, text: &str, k: usize) -> SearchResponse {
    engine
        .search(SearchRequest::text(text).with_k(k))
        .await
        .expect("Search failed")
}

/// Paths of the hits, in rank order.
pub fn hit_paths(response: &SearchResponse) -> Vec<PathBuf> {
    response.hits.iter().map(|h| h.path.clone()).collect()
}

/// Hit count per path.
pub fn hits_per_path(response: &SearchResponse) -> BTreeMap<PathBuf, usize> {
    let mut counts = BTreeMap::new();
    for hit in &response.hits {
        *counts.entry(hit.path.clone()).or_insert(0) += 1;
    }
    counts
}

/// `count` space-separated words unique to `tag`.
pub fn words(tag: &str, count: usize) -> String {
    (0..count)
        .map(|i| format!("{}x{}", tag, i))
        .collect::<Vec<_>>()
        .join(" ")
}
