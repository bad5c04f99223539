//! Write-temp-then-rename atomic file operations (spec 4.1).
//!
//! Every writer in this crate goes through `write_atomic` so a reader never
//! observes a partially-written field. The temp file is always created next
//! to its target so the rename is guaranteed to land on the same filesystem.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Writes `contents` to `path` via a same-directory temp file and atomic
/// rename. On any failure the temp file is removed before returning.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all().or(Ok::<(), std::io::Error>(()))?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();

    result.map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StorageError::io(path.to_path_buf(), e)
    })
}

pub fn write_atomic_str(path: &Path, contents: &str) -> Result<()> {
    write_atomic(path, contents.as_bytes())
}

/// Reads `path`, trimming surrounding whitespace. Returns `Ok(None)` if the
/// file is absent, distinguishing that from a genuine I/O error.
pub fn read_or_none(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path.to_path_buf(), e)),
    }
}

/// Deletes `path` if it exists; a missing file is not an error.
pub fn delete_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("field");
        write_atomic_str(&path, "hello").unwrap();
        assert_eq!(read_or_none(&path).unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn read_missing_file_is_none_not_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");
        assert_eq!(read_or_none(&path).unwrap(), None);
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("field");
        write_atomic_str(&path, "v1").unwrap();
        write_atomic_str(&path, "v2").unwrap();
        assert_eq!(read_or_none(&path).unwrap(), Some("v2".to_string()));
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn delete_if_present_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("field");
        write_atomic_str(&path, "v1").unwrap();
        delete_if_present(&path).unwrap();
        delete_if_present(&path).unwrap();
        assert_eq!(read_or_none(&path).unwrap(), None);
    }
}
