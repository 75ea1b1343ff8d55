//! Column family definitions for RocksDB.
//!
//! - snapshot: the single current snapshot blob (default compaction)
//! - commit_log: commit records keyed by generation (default compaction)
//! - meta: small bookkeeping values such as the snapshot generation

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for the snapshot blob
pub const CF_SNAPSHOT: &str = "snapshot";

/// Column family name for commit records appended since the snapshot
pub const CF_COMMIT_LOG: &str = "commit_log";

/// Column family name for bookkeeping values
pub const CF_META: &str = "meta";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_SNAPSHOT, CF_COMMIT_LOG, CF_META];

/// Snapshots are large and rewritten wholesale
fn snapshot_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_SNAPSHOT, snapshot_options()),
        ColumnFamilyDescriptor::new(CF_COMMIT_LOG, Options::default()),
        ColumnFamilyDescriptor::new(CF_META, Options::default()),
    ]
}
