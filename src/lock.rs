use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use ftp_remote_fs_error::Error;

use crate::utils::normalize_path;

/// Hands out named mutual exclusion guards keyed by normalized logical
/// path.
///
/// Write and delete entry points consult this factory before mutating, so
/// two conflicting operations on the same path surface a
/// [`Error::FileLock`] instead of silently racing. Distinct paths never
/// contend.
///
/// Cloning shares the underlying registry.
#[derive(Debug, Clone, Default)]
pub struct PathLockFactory {
    held: Arc<Mutex<HashSet<String>>>,
}

impl PathLockFactory {
    /// Create a factory with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock on `path`, failing with [`Error::FileLock`] if a
    /// conflicting lock is already held.
    ///
    /// The lock is released when the returned guard is dropped.
    pub fn try_acquire(&self, path: &str) -> Result<PathLock, Error> {
        let path = normalize_path(path);
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());

        if !held.insert(path.clone()) {
            return Err(Error::FileLock(path));
        }

        Ok(PathLock {
            held: Arc::clone(&self.held),
            path,
        })
    }

    /// Fail with [`Error::FileLock`] if a conflicting lock is held on
    /// `path`, without acquiring it.
    pub fn verify_not_locked(&self, path: &str) -> Result<(), Error> {
        let path = normalize_path(path);
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());

        if held.contains(&path) {
            Err(Error::FileLock(path))
        } else {
            Ok(())
        }
    }
}

/// Guard over a canonicalized path string, released on drop.
#[derive(Debug)]
pub struct PathLock {
    held: Arc<Mutex<HashSet<String>>>,
    path: String,
}

impl PathLock {
    /// The normalized path this guard protects.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_contends() {
        let locks = PathLockFactory::new();
        let guard = locks.try_acquire("/a/f").unwrap();

        assert!(matches!(
            locks.try_acquire("/a/f"),
            Err(Error::FileLock(_))
        ));
        assert!(matches!(
            locks.verify_not_locked("/a/f"),
            Err(Error::FileLock(_))
        ));

        drop(guard);
        locks.try_acquire("/a/f").unwrap();
    }

    #[test]
    fn distinct_paths_never_contend() {
        let locks = PathLockFactory::new();
        let _a = locks.try_acquire("/a").unwrap();
        let _b = locks.try_acquire("/b").unwrap();
    }

    #[test]
    fn spellings_of_the_same_path_share_a_lock() {
        let locks = PathLockFactory::new();
        let _guard = locks.try_acquire("/a/f/").unwrap();
        assert!(matches!(locks.try_acquire("a//f"), Err(Error::FileLock(_))));
        assert!(matches!(
            locks.try_acquire("/a/./f"),
            Err(Error::FileLock(_))
        ));
        assert!(matches!(
            locks.try_acquire("/x/../a/f"),
            Err(Error::FileLock(_))
        ));
    }
}
