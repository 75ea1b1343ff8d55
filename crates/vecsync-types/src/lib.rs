//! # vecsync-types
//!
//! Shared domain types for the vecsync index engine.
//!
//! This crate defines the data structures used throughout the system:
//! - Documents and chunks: what the index knows about each watched file
//! - File events: the debounced change notifications that drive reconciliation
//! - Path status: the per-path lifecycle surfaced through `status()`
//! - Settings: layered configuration for every component
//!
//! ## Usage
//!
//! ```rust
//! use vecsync_types::{ChunkKey, FileEvent};
//!
//! let key = ChunkKey::new("/notes/a.txt", 0);
//! let event = FileEvent::modified("/notes/a.txt");
//! assert_eq!(key.path, event.path);
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod status;

pub use config::{
    ChunkingSettings, CompactionSettings, EmbeddingProvider, EmbeddingSettings, IndexSettings,
    PersistenceSettings, ReconcilerSettings, SearchSettings, Settings, DEFAULT_EXTENSIONS,
};
pub use document::{ChunkKey, ChunkRecord, DistanceMetric, DocumentRecord, NodeId};
pub use error::ConfigError;
pub use event::{FileEvent, FileEventKind};
pub use status::{PathState, PathStatus};
