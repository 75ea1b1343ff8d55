//! Mapping of debounced notify events onto file events.

use std::collections::HashSet;
use std::path::Path;

use notify_debouncer_full::notify::event::{ModifyKind, RenameMode};
use notify_debouncer_full::notify::{Event, EventKind};
use tracing::trace;
use vecsync_types::FileEvent;

/// Accepts paths whose lowercase extension is in the set.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_lowercase()))
    }
}

/// Turn one notify event into zero or more file events.
///
/// Directories, unsupported extensions and access notifications are
/// dropped. A rename reported as a pair becomes one `Renamed` event; when
/// only one side is supported it degrades to a delete or a create.
pub fn translate(event: &Event, filter: &ExtensionFilter) -> Vec<FileEvent> {
    let is_file = |p: &Path| filter.accepts(p) && !p.is_dir();

    let out: Vec<FileEvent> = match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| is_file(p))
            .map(FileEvent::created)
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter(|p| filter.accepts(p))
            .map(FileEvent::deleted)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let (from, to) = (&event.paths[0], &event.paths[1]);
            match (filter.accepts(from), is_file(to)) {
                (true, true) => vec![FileEvent::renamed(from, to)],
                (true, false) => vec![FileEvent::deleted(from)],
                (false, true) => vec![FileEvent::created(to)],
                (false, false) => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .filter(|p| filter.accepts(p))
            .map(FileEvent::deleted)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .filter(|p| is_file(p))
            .map(FileEvent::created)
            .collect(),
        EventKind::Modify(_) | EventKind::Any => event
            .paths
            .iter()
            .filter(|p| is_file(p))
            .map(FileEvent::modified)
            .collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    };

    if out.is_empty() {
        trace!(kind = ?event.kind, paths = ?event.paths, "Ignored notification");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_debouncer_full::notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use vecsync_types::FileEventKind;

    fn filter() -> ExtensionFilter {
        ExtensionFilter::new(["txt", ".md"])
    }

    #[test]
    fn test_extension_filter() {
        let f = filter();
        assert!(f.accepts(Path::new("/a/b.TXT")));
        assert!(f.accepts(Path::new("/a/b.md")));
        assert!(!f.accepts(Path::new("/a/b.rs")));
        assert!(!f.accepts(Path::new("/a/noext")));
    }

    #[test]
    fn test_create_and_modify() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();

        let created = translate(
            &Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone()),
            &filter(),
        );
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, FileEventKind::Created);

        let modified = translate(
            &Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(path.clone()),
            &filter(),
        );
        assert_eq!(modified[0].kind, FileEventKind::Modified);
        assert_eq!(modified[0].path, path);
    }

    #[test]
    fn test_directories_and_unsupported_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("folder.txt");
        std::fs::create_dir(&sub).unwrap();

        let events = translate(
            &Event::new(EventKind::Create(CreateKind::Folder)).add_path(sub),
            &filter(),
        );
        assert!(events.is_empty());

        let events = translate(
            &Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/x/y.bin")),
            &filter(),
        );
        assert!(events.is_empty());

        let events = translate(
            &Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("/x/y.txt")),
            &filter(),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_remove_of_missing_file() {
        let events = translate(
            &Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/gone/a.txt")),
            &filter(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FileEventKind::Deleted);
        assert_eq!(events[0].path, PathBuf::from("/gone/a.txt"));
    }

    #[test]
    fn test_rename_pair() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("old.txt");
        let to = dir.path().join("new.txt");
        std::fs::write(&to, "x").unwrap();

        let events = translate(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(from.clone())
                .add_path(to.clone()),
            &filter(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, to);
        assert_eq!(events[0].kind, FileEventKind::Renamed { from });
    }

    #[test]
    fn test_rename_to_unsupported_extension_is_delete() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("notes.txt");
        let to = dir.path().join("notes.bak");
        std::fs::write(&to, "x").unwrap();

        let events = translate(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(from.clone())
                .add_path(to),
            &filter(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FileEventKind::Deleted);
        assert_eq!(events[0].path, from);
    }
}
