//! Per-path indexing status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a watched path as reported by `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathState {
    /// Event received, not yet committed
    Pending,
    /// Current content is searchable
    Indexed,
    /// Retries exhausted; excluded from the index until the next event
    Failed,
    /// File removed; all chunks tombstoned
    Deleted,
}

impl fmt::Display for PathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathState::Pending => write!(f, "pending"),
            PathState::Indexed => write!(f, "indexed"),
            PathState::Failed => write!(f, "failed"),
            PathState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Status entry for one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStatus {
    pub state: PathState,
    /// Live chunks currently owned by the path
    pub chunks: usize,
    /// Attempts made for the most recent event
    pub attempts: u32,
    /// Last error message, kept while the path is failed
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PathStatus {
    pub fn pending() -> Self {
        Self::with_state(PathState::Pending)
    }

    pub fn indexed(chunks: usize) -> Self {
        Self {
            chunks,
            ..Self::with_state(PathState::Indexed)
        }
    }

    pub fn deleted() -> Self {
        Self::with_state(PathState::Deleted)
    }

    pub fn failed(attempts: u32, error: impl Into<String>) -> Self {
        Self {
            attempts,
            last_error: Some(error.into()),
            ..Self::with_state(PathState::Failed)
        }
    }

    fn with_state(state: PathState) -> Self {
        Self {
            state,
            chunks: 0,
            attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_status_keeps_error() {
        let status = PathStatus::failed(5, "model unavailable");
        assert_eq!(status.state, PathState::Failed);
        assert_eq!(status.attempts, 5);
        assert_eq!(status.last_error.as_deref(), Some("model unavailable"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PathState::Indexed.to_string(), "indexed");
        assert_eq!(PathState::Deleted.to_string(), "deleted");
    }
}
