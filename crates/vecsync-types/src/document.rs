//! Document and chunk records.
//!
//! A document is a watched file that has been extracted, chunked and embedded.
//! Each chunk is addressed by a stable logical key (path + chunk offset) and
//! owns exactly one graph node while it is live.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compact integer identifier of a node in the proximity graph.
pub type NodeId = u32;

/// Distance function used by the graph index, fixed at index creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// 1 - cosine similarity
    #[default]
    Cosine,
    /// L2 distance
    Euclidean,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Cosine => write!(f, "cosine"),
            DistanceMetric::Euclidean => write!(f, "euclidean"),
        }
    }
}

/// Stable logical key of a chunk: the owning document path and the chunk's
/// position in the document's chunk sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub path: PathBuf,
    pub offset: u32,
}

impl ChunkKey {
    pub fn new(path: impl Into<PathBuf>, offset: u32) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.offset)
    }
}

/// A live chunk of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Logical key
    pub key: ChunkKey,
    /// Byte offset where the chunk's text starts in the extracted text
    pub start: usize,
    /// Byte offset one past the chunk's last byte
    pub end: usize,
    /// Graph node holding this chunk's embedding
    pub node_id: NodeId,
}

impl ChunkRecord {
    pub fn new(key: ChunkKey, start: usize, end: usize, node_id: NodeId) -> Self {
        Self {
            key,
            start,
            end,
            node_id,
        }
    }

    /// Length of the span in bytes
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Indexed state of one watched file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Absolute path of the file
    pub path: PathBuf,
    /// Last-modified time observed when the content was read
    pub modified_at: Option<DateTime<Utc>>,
    /// blake3 hex digest of the raw file bytes
    pub content_hash: String,
    /// Live chunks, ordered by offset
    pub chunks: Vec<ChunkRecord>,
    /// When this version was committed
    pub indexed_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(
        path: impl Into<PathBuf>,
        content_hash: impl Into<String>,
        modified_at: Option<DateTime<Utc>>,
        chunks: Vec<ChunkRecord>,
    ) -> Self {
        Self {
            path: path.into(),
            modified_at,
            content_hash: content_hash.into(),
            chunks,
            indexed_at: Utc::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Node ids owned by this document.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.chunks.iter().map(|c| c.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_display() {
        let key = ChunkKey::new("/docs/a.txt", 3);
        assert_eq!(key.to_string(), "/docs/a.txt#3");
    }

    #[test]
    fn test_chunk_key_ordering_by_path_then_offset() {
        let a0 = ChunkKey::new("/a", 0);
        let a1 = ChunkKey::new("/a", 1);
        let b0 = ChunkKey::new("/b", 0);
        assert!(a0 < a1);
        assert!(a1 < b0);
    }

    #[test]
    fn test_document_node_ids() {
        let doc = DocumentRecord::new(
            "/a",
            "hash",
            None,
            vec![
                ChunkRecord::new(ChunkKey::new("/a", 0), 0, 10, 7),
                ChunkRecord::new(ChunkKey::new("/a", 1), 8, 20, 9),
            ],
        );
        assert_eq!(doc.node_ids().collect::<Vec<_>>(), vec![7, 9]);
    }

    #[test]
    fn test_metric_serialization() {
        let json = serde_json::to_string(&DistanceMetric::Euclidean).unwrap();
        assert_eq!(json, "\"euclidean\"");
        let metric: DistanceMetric = serde_json::from_str("\"cosine\"").unwrap();
        assert_eq!(metric, DistanceMetric::Cosine);
    }
}
