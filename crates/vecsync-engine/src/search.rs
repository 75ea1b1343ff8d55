//! Search request and result types.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vecsync_types::NodeId;

/// What to search for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// A vector of the index dimension
    Vector(Vec<f32>),
    /// Text embedded with the configured model
    Text(String),
}

/// Restricts results to a subset of documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathFilter {
    /// Documents under this path, matched component-wise
    Prefix(PathBuf),
    /// Exactly these documents
    Paths(BTreeSet<PathBuf>),
}

impl PathFilter {
    pub fn prefix(path: impl Into<PathBuf>) -> Self {
        PathFilter::Prefix(path.into())
    }

    pub fn paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        PathFilter::Paths(paths.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, path: &Path) -> bool {
        match self {
            PathFilter::Prefix(prefix) => path.starts_with(prefix),
            PathFilter::Paths(set) => set.contains(path),
        }
    }
}

/// A k-nearest-neighbor query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Query,
    /// Number of results; the configured default when unset
    pub k: Option<usize>,
    pub filter: Option<PathFilter>,
    /// Hits scoring at or below this are dropped; the configured default when unset
    pub min_score: Option<f32>,
}

impl SearchRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            k: None,
            filter: None,
            min_score: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Query::Text(text.into()))
    }

    pub fn vector(vector: Vec<f32>) -> Self {
        Self::new(Query::Vector(vector))
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: PathBuf,
    /// Chunk offset within the document
    pub offset: u32,
    /// Higher is closer
    pub score: f32,
    pub node_id: NodeId,
    /// Byte span of the chunk in the extracted text
    pub start: usize,
    pub end: usize,
}

/// Hits ordered by descending score, plus the generation they were read at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub generation: u64,
    /// Whether the beam had to grow to find enough accepted nodes
    pub widened: bool,
}

impl SearchResponse {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn top(&self) -> Option<&SearchHit> {
        self.hits.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_filter_is_component_wise() {
        let filter = PathFilter::prefix("/docs/a");
        assert!(filter.matches(Path::new("/docs/a/x.txt")));
        assert!(filter.matches(Path::new("/docs/a")));
        assert!(!filter.matches(Path::new("/docs/ab/x.txt")));
        assert!(!filter.matches(Path::new("/other/a/x.txt")));
    }

    #[test]
    fn test_path_set_filter() {
        let filter = PathFilter::paths(["/a.txt", "/b.txt"]);
        assert!(filter.matches(Path::new("/a.txt")));
        assert!(!filter.matches(Path::new("/c.txt")));
    }

    #[test]
    fn test_request_builder() {
        let req = SearchRequest::text("alpha")
            .with_k(3)
            .with_filter(PathFilter::prefix("/docs"))
            .with_min_score(0.2);
        assert_eq!(req.query, Query::Text("alpha".into()));
        assert_eq!(req.k, Some(3));
        assert_eq!(req.min_score, Some(0.2));
        assert!(req.filter.is_some());
    }
}
