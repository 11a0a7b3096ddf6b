//! Change event types
//!
//! This module defines the raw notifications produced by a change source and
//! the immutable events delivered to consumers after filtering.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Kind of file system change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// File was created
    Created,
    /// File contents were modified
    Modified,
    /// File was deleted
    Deleted,
    /// File was renamed
    Renamed,
}

impl ChangeKind {
    /// Whether the file is expected to be gone after this change
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// Unfiltered notification produced by a raw change source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    /// Path the change applies to (the new path for renames)
    pub path: PathBuf,
    /// Kind of change
    pub kind: ChangeKind,
    /// Previous path of a rename, when the source reports it
    pub old_path: Option<PathBuf>,
}

impl RawChange {
    /// Create a raw change for a single path
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            old_path: None,
        }
    }

    /// Create a raw rename with both ends known
    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            path: to.into(),
            kind: ChangeKind::Renamed,
            old_path: Some(from.into()),
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ChangeKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ChangeKind::Modified)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ChangeKind::Deleted)
    }
}

/// Change notification delivered to consumers
///
/// Events are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    path: PathBuf,
    kind: ChangeKind,
    timestamp: SystemTime,
    file_size: u64,
    extension: String,
    old_path: Option<PathBuf>,
    watch_root: PathBuf,
}

impl ChangeEvent {
    /// Build an event from an accepted raw change
    ///
    /// `file_size` is the size observed on disk, or 0 when the file no longer exists.
    pub fn new(raw: RawChange, file_size: u64, watch_root: impl Into<PathBuf>) -> Self {
        let extension = extension_of(&raw.path);
        Self {
            path: raw.path,
            kind: raw.kind,
            timestamp: SystemTime::now(),
            file_size,
            extension,
            old_path: raw.old_path,
            watch_root: watch_root.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Size in bytes at the time the event was observed (0 if unavailable)
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Lowercased extension including the leading dot, or empty
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn old_path(&self) -> Option<&Path> {
        self.old_path.as_deref()
    }

    /// Canonical root of the watch that produced this event
    pub fn watch_root(&self) -> &Path {
        &self.watch_root
    }
}

/// Lowercased extension of `path` with its leading dot, or an empty string
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_is_lowercased_with_dot() {
        assert_eq!(extension_of(Path::new("/in/Report.TXT")), ".txt");
        assert_eq!(extension_of(Path::new("archive.tar.gz")), ".gz");
        assert_eq!(extension_of(Path::new("/in/Makefile")), "");
        assert_eq!(extension_of(Path::new("/in/.bashrc")), "");
    }

    #[test]
    fn test_change_event_from_raw() {
        let event = ChangeEvent::new(RawChange::modified("/in/a.CSV"), 42, "/in");

        assert_eq!(event.path(), Path::new("/in/a.CSV"));
        assert_eq!(event.kind(), ChangeKind::Modified);
        assert_eq!(event.file_size(), 42);
        assert_eq!(event.extension(), ".csv");
        assert_eq!(event.watch_root(), Path::new("/in"));
        assert!(event.old_path().is_none());
        assert!(event.timestamp() <= SystemTime::now());
    }

    #[test]
    fn test_rename_keeps_both_paths() {
        let raw = RawChange::renamed("/in/a.tmp", "/in/a.txt");
        assert_eq!(raw.kind, ChangeKind::Renamed);

        let event = ChangeEvent::new(raw, 7, "/in");
        assert_eq!(event.path(), Path::new("/in/a.txt"));
        assert_eq!(event.old_path(), Some(Path::new("/in/a.tmp")));
        assert_eq!(event.extension(), ".txt");
    }

    #[test]
    fn test_only_deletion_is_removal() {
        assert!(ChangeKind::Deleted.is_removal());
        assert!(!ChangeKind::Created.is_removal());
        assert!(!ChangeKind::Modified.is_removal());
        assert!(!ChangeKind::Renamed.is_removal());
    }

    #[test]
    fn test_change_event_serializes() {
        let event = ChangeEvent::new(RawChange::deleted("/in/gone.txt"), 0, "/in");
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "Deleted");
        assert_eq!(json["file_size"], 0);
        assert_eq!(json["extension"], ".txt");
    }
}
