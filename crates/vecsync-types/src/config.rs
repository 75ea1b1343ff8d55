//! Configuration loading for vecsync.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `<config dir>/vecsync/config.{toml,json,yaml}`.
//! Environment variables use the `VECSYNC_` prefix and `__` between nested keys,
//! e.g. `VECSYNC_EMBEDDING__PROVIDER=http`.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

use crate::document::DistanceMetric;
use crate::error::ConfigError;

/// Extensions indexed when no explicit allow-list is configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    // Text files
    "txt", "md", "rst", "log", "json", "xml", "yaml", "yml", "ini", "conf", "cfg",
    // Code files
    "py", "js", "ts", "java", "c", "cpp", "h", "hpp", "cs", "go", "rb", "php", "rs", "sh",
    "html", "css", "sql",
];

/// Chunker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Maximum number of word tokens per chunk
    pub max_tokens: usize,
    /// Fraction of `max_tokens` shared between consecutive chunks, in [0, 1)
    pub overlap: f32,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            overlap: 0.15,
        }
    }
}

impl ChunkingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("chunking.max_tokens must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(ConfigError::Invalid(format!(
                "chunking.overlap must be in [0, 1), got {}",
                self.overlap
            )));
        }
        Ok(())
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Offline feature-hashing embedder
    #[default]
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint
    Http,
}

/// Embedding model and batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    /// Vector dimension produced by the model
    pub dimension: usize,
    /// API base URL (http provider only)
    pub base_url: String,
    /// Model name sent to the API (http provider only)
    pub model: String,
    /// API key (loaded from env var, not stored in config file)
    pub api_key: Option<String>,
    /// Maximum texts per model call
    pub batch_size: usize,
    /// How long a partial batch waits for more texts
    pub batch_timeout_ms: u64,
    /// Bounded wait for one model call; exceeding it is a model error
    pub request_timeout_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            dimension: 384,
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            model: "paraphrase-multilingual-MiniLM-L12-v2".to_string(),
            api_key: None,
            batch_size: 32,
            batch_timeout_ms: 50,
            request_timeout_ms: 30_000,
        }
    }
}

impl EmbeddingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::Invalid("embedding.dimension must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be > 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "embedding.request_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Proximity graph parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub metric: DistanceMetric,
    /// Target neighbors per node on upper layers (layer 0 keeps 2*m)
    pub m: usize,
    /// Candidate beam while inserting
    pub ef_construction: usize,
    /// Initial candidate beam while searching
    pub ef_search: usize,
    /// Hard cap for the widening search beam
    pub max_ef: usize,
    /// Seed for level assignment
    pub seed: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_ef: 2048,
            seed: 0x5eed,
        }
    }
}

impl IndexSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.m < 2 {
            return Err(ConfigError::Invalid(format!("index.m must be >= 2, got {}", self.m)));
        }
        if self.ef_construction < self.m {
            return Err(ConfigError::Invalid(
                "index.ef_construction must be >= index.m".into(),
            ));
        }
        if self.ef_search == 0 || self.max_ef < self.ef_search {
            return Err(ConfigError::Invalid(
                "index.max_ef must be >= index.ef_search > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Change reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    /// Paths processed concurrently
    pub workers: usize,
    /// Capacity of the bounded event channel
    pub queue_capacity: usize,
    /// Quiet period before a burst of filesystem events is emitted
    pub debounce_ms: u64,
    /// Attempts per event before a path is marked failed
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            debounce_ms: 1000,
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
        }
    }
}

impl ReconcilerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("reconciler.workers must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.queue_capacity must be > 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.max_attempts must be > 0".into(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "reconciler.max_backoff_ms must be >= initial_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Compaction trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionSettings {
    /// Compact when tombstoned nodes exceed this fraction of all nodes
    pub tombstone_ratio: f32,
    /// Never compact for fewer tombstones than this
    pub min_tombstones: usize,
    /// How often the maintenance loop checks the trigger
    pub check_interval_secs: u64,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            tombstone_ratio: 0.25,
            min_tombstones: 64,
            check_interval_secs: 60,
        }
    }
}

impl CompactionSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.tombstone_ratio) {
            return Err(ConfigError::Invalid(format!(
                "compaction.tombstone_ratio must be 0.0-1.0, got {}",
                self.tombstone_ratio
            )));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "compaction.check_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Whether the given counts cross the trigger.
    pub fn should_compact(&self, tombstones: usize, total_nodes: usize) -> bool {
        if total_nodes == 0 || tombstones < self.min_tombstones.max(1) {
            return false;
        }
        tombstones as f32 / total_nodes as f32 > self.tombstone_ratio
    }
}

/// Snapshot cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Take a snapshot after this many commits have been appended to the log
    pub snapshot_every: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self { snapshot_every: 256 }
    }
}

/// Query defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_k: usize,
    /// Hits scoring at or below this are dropped
    pub min_score: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_k: 5,
            min_score: 0.0,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Folders watched recursively
    #[serde(default)]
    pub watch_folders: Vec<String>,

    /// Extension allow-list (without leading dot); defaults to DEFAULT_EXTENSIONS
    #[serde(default)]
    pub extensions: Option<Vec<String>>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Rebuild from the watched files when persisted state fails verification
    #[serde(default = "default_rebuild_on_corruption")]
    pub rebuild_on_corruption: bool,

    #[serde(default)]
    pub chunking: ChunkingSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub compaction: CompactionSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub search: SearchSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "vecsync")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./vecsync-db"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rebuild_on_corruption() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            watch_folders: Vec::new(),
            extensions: None,
            log_level: default_log_level(),
            rebuild_on_corruption: default_rebuild_on_corruption(),
            chunking: ChunkingSettings::default(),
            embedding: EmbeddingSettings::default(),
            index: IndexSettings::default(),
            reconciler: ReconcilerSettings::default(),
            compaction: CompactionSettings::default(),
            persistence: PersistenceSettings::default(),
            search: SearchSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (<config dir>/vecsync/config.*)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (VECSYNC_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "vecsync")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())?
            .set_default("log_level", default_log_level())?
            .set_default("rebuild_on_corruption", default_rebuild_on_corruption())?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("VECSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("watch_folders")
                .with_list_parse_key("extensions"),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        self.embedding.validate()?;
        self.index.validate()?;
        self.reconciler.validate()?;
        self.compaction.validate()?;
        if self.persistence.snapshot_every == 0 {
            return Err(ConfigError::Invalid(
                "persistence.snapshot_every must be > 0".into(),
            ));
        }
        if self.search.default_k == 0 {
            return Err(ConfigError::Invalid("search.default_k must be > 0".into()));
        }
        Ok(())
    }

    /// Expand ~ in db_path to actual home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Watch folders with ~ expanded.
    pub fn expanded_watch_folders(&self) -> Vec<PathBuf> {
        self.watch_folders.iter().map(|f| expand_home(f)).collect()
    }

    /// Lowercase extensions without leading dots.
    pub fn supported_extensions(&self) -> Vec<String> {
        match &self.extensions {
            Some(list) => list
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            None => DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
