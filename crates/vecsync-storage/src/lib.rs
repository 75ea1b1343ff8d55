//! Storage layer for the vecsync index engine.
//!
//! Persisted state is opaque to this crate: a snapshot blob plus an ordered
//! log of commit records written since that snapshot. Provides:
//! - The `DurableStore` trait the engine persists through
//! - `RocksStore`: RocksDB-backed store with column family isolation
//! - `MemoryStore`: in-process store for tests and ephemeral engines
//! - Atomic snapshot replacement with log truncation via WriteBatch

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod memory;
pub mod store;

pub use db::RocksStore;
pub use error::StorageError;
pub use keys::LogKey;
pub use memory::MemoryStore;
pub use store::{DurableStore, StorageStats};
