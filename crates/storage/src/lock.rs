//! Cross-process advisory locking (spec 4.4), grounded on the teacher's
//! `fs2`-based scheduler-lock acquisition in `lifecycle/mod.rs`, generalized
//! to any lock path (scheduler lock and per-job locks alike).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use fs2::FileExt;
use parking_lot::Mutex;

use crate::error::{Result, StorageError};

/// In-process registry of currently-held lock paths. OS advisory locks are
/// per file-description; on some platforms two opens from the same process
/// would not conflict with each other, so this registry is the backstop that
/// makes overlap detection reliable regardless of platform lock semantics.
fn registry() -> &'static Mutex<HashSet<PathBuf>> {
    static REGISTRY: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// A held exclusive lock on a path. Dropping it releases the OS lock,
/// clears the in-process registry entry, and best-effort deletes the lock
/// file.
pub struct FileLock {
    path: PathBuf,
    file: std::fs::File,
}

impl FileLock {
    /// Attempts to acquire an exclusive, non-blocking lock on `path`.
    /// Returns `Ok(None)` if another holder (in this process or another)
    /// already has it -- never blocks.
    pub fn try_acquire(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();

        {
            let mut held = registry().lock();
            if held.contains(&path) {
                return Ok(None);
            }
            // Reserve optimistically; rolled back below if the OS lock fails.
            held.insert(path.clone());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent.to_path_buf(), e))?;
        }

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::io(path.clone(), e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { path, file })),
            Err(_) => {
                registry().lock().remove(&path);
                Ok(None)
            }
        }
    }

    /// True iff a `try_acquire` on this path would currently fail.
    pub fn is_locked(path: &Path) -> bool {
        if registry().lock().contains(path) {
            return true;
        }
        let Ok(file) = std::fs::OpenOptions::new().write(true).create(true).open(path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = fs2::FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        registry().lock().remove(&self.path);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_in_same_process_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");
        let first = FileLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        let second = FileLock::try_acquire(&path).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn is_locked_reflects_current_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job-1.lock");
        assert!(!FileLock::is_locked(&path));
        let guard = FileLock::try_acquire(&path).unwrap().unwrap();
        assert!(FileLock::is_locked(&path));
        drop(guard);
        assert!(!FileLock::is_locked(&path));
    }

    #[test]
    fn drop_releases_and_allows_reacquire() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job-2.lock");
        {
            let _guard = FileLock::try_acquire(&path).unwrap().unwrap();
        }
        let reacquired = FileLock::try_acquire(&path).unwrap();
        assert!(reacquired.is_some());
    }
}
