//! Full walk of the watched folders.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::extract::ExtractorRegistry;

/// Paths to (re)index and indexed paths whose files are gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPlan {
    pub upserts: Vec<PathBuf>,
    pub removals: Vec<PathBuf>,
}

impl ScanPlan {
    pub fn len(&self) -> usize {
        self.upserts.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Supported files under `root`, sorted. A file root is returned as-is when supported.
pub fn supported_files(root: &Path, extractors: &ExtractorRegistry) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && extractors.supports(entry.path()) {
                    files.push(entry.into_path());
                }
            }
            Err(e) => warn!(root = %root.display(), error = %e, "Skipping unreadable entry"),
        }
    }
    files.sort();
    files
}

/// Walk every root and compare against the indexed documents.
pub fn plan_scan<'a>(
    roots: &[PathBuf],
    extractors: &ExtractorRegistry,
    indexed: impl IntoIterator<Item = &'a Path>,
) -> ScanPlan {
    let mut upserts = BTreeSet::new();
    for root in roots {
        if !root.exists() {
            warn!(root = %root.display(), "Watch folder does not exist");
            continue;
        }
        upserts.extend(supported_files(root, extractors));
    }

    let removals: Vec<PathBuf> = indexed
        .into_iter()
        .filter(|p| !upserts.contains(*p) && !p.exists())
        .map(Path::to_path_buf)
        .collect();

    debug!(
        roots = roots.len(),
        files = upserts.len(),
        vanished = removals.len(),
        "Scanned watch folders"
    );
    ScanPlan {
        upserts: upserts.into_iter().collect(),
        removals,
    }
}
