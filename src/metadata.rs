use std::time::SystemTime;

use crate::{
    client::FtpEntry,
    utils::{join_path, normalize_path},
};

/// Immutable point-in-time snapshot of a remote entry.
///
/// Built from a native listing entry resolved against the directory it was
/// listed in. Staleness must always be re-checked explicitly; an existing
/// snapshot says nothing about the current state of the server.
#[derive(Debug, Clone)]
pub struct FileAttributes {
    path: String,
    entry: FtpEntry,
}

impl FileAttributes {
    /// Build attributes for `entry` as listed inside the directory at
    /// `parent`.
    pub fn from_entry(parent: &str, entry: FtpEntry) -> Self {
        Self {
            path: join_path(parent, &entry.name),
            entry,
        }
    }

    /// Synthetic attributes for the server root, which never shows up in a
    /// listing of a parent.
    pub(crate) fn root() -> Self {
        Self {
            path: "/".to_string(),
            entry: FtpEntry {
                name: "/".to_string(),
                size: 0,
                modified: None,
                is_directory: true,
            },
        }
    }

    /// The normalized logical path of the entry.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The name of the entry within its parent directory.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Size of the entry in bytes at snapshot time.
    pub fn len(&self) -> u64 {
        self.entry.size
    }

    /// Whether the entry had no content at snapshot time.
    pub fn is_empty(&self) -> bool {
        self.entry.size == 0
    }

    /// Last modification time, if the server reported one.
    pub fn modified(&self) -> Option<SystemTime> {
        self.entry.modified
    }

    /// Whether the entry denotes a directory.
    pub fn is_directory(&self) -> bool {
        self.entry.is_directory
    }

    /// Whether the entry denotes a regular file.
    pub fn is_regular_file(&self) -> bool {
        !self.entry.is_directory
    }

    /// The native listing entry this snapshot was built from.
    pub fn entry(&self) -> &FtpEntry {
        &self.entry
    }
}

impl PartialEq for FileAttributes {
    /// Two snapshots are equal when they denote the same path with the same
    /// size, kind and modification time.
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.entry.size == other.entry.size
            && self.entry.is_directory == other.entry.is_directory
            && self.entry.modified == other.entry.modified
    }
}

impl FileAttributes {
    /// Normalize a caller-supplied path the same way snapshot paths are
    /// normalized.
    pub fn normalize(path: &str) -> String {
        normalize_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u64, dir: bool) -> FtpEntry {
        FtpEntry {
            name: name.to_string(),
            size,
            modified: None,
            is_directory: dir,
        }
    }

    #[test]
    fn resolves_path_against_parent() {
        let attrs = FileAttributes::from_entry("/a/b", entry("f1", 10, false));
        assert_eq!(attrs.path(), "/a/b/f1");
        assert_eq!(attrs.name(), "f1");
        assert_eq!(attrs.len(), 10);
        assert!(attrs.is_regular_file());
    }

    #[test]
    fn root_is_a_directory() {
        let root = FileAttributes::root();
        assert_eq!(root.path(), "/");
        assert!(root.is_directory());
    }
}
