//! Debounced filesystem change events.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of change observed for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    /// The event's `path` is the new location; `from` is the old one.
    Renamed { from: PathBuf },
}

/// A single change notification after debouncing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Modified)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Deleted)
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::new(to, FileEventKind::Renamed { from: from.into() })
    }

    /// Split the event into single-path events.
    ///
    /// A rename becomes a deletion of the old path followed by a creation of
    /// the new one; chunk identity is not carried across the move.
    pub fn expand(self) -> Vec<FileEvent> {
        match self.kind {
            FileEventKind::Renamed { from } => vec![
                FileEvent {
                    path: from,
                    kind: FileEventKind::Deleted,
                    timestamp: self.timestamp,
                },
                FileEvent {
                    path: self.path,
                    kind: FileEventKind::Created,
                    timestamp: self.timestamp,
                },
            ],
            _ => vec![self],
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self.kind, FileEventKind::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_expands_to_delete_then_create() {
        let events = FileEvent::renamed("/old.txt", "/new.txt").expand();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].path, PathBuf::from("/old.txt"));
        assert_eq!(events[0].kind, FileEventKind::Deleted);
        assert_eq!(events[1].path, PathBuf::from("/new.txt"));
        assert_eq!(events[1].kind, FileEventKind::Created);
    }

    #[test]
    fn test_plain_event_expands_to_itself() {
        let event = FileEvent::modified("/a.txt");
        let expanded = event.clone().expand();
        assert_eq!(expanded, vec![event]);
    }

    #[test]
    fn test_event_kind_serialization() {
        let json = serde_json::to_string(&FileEventKind::Deleted).unwrap();
        assert_eq!(json, "\"deleted\"");
    }
}
