//! Canonical, deterministic paths derived from a single base directory.
//! Never mutable at runtime (spec 4.3) -- a `DirLayout` is built once at
//! startup from `Config::base_dir` and handed to every other component.

use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};
use barn_core::JobId;

#[derive(Debug, Clone)]
pub struct DirLayout {
    base: PathBuf,
}

impl DirLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.base.join("jobs")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.base.join("locks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.logs_dir().join("barn.log")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.base.join("barn.sock")
    }

    pub fn scheduler_lock_path(&self) -> PathBuf {
        self.locks_dir().join("scheduler.lock")
    }

    pub fn job_lock_path(&self, id: &JobId) -> PathBuf {
        self.locks_dir().join(format!("job-{}.lock", id.as_str()))
    }

    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.jobs_dir().join(id.as_str())
    }

    pub fn job_work_input_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("work").join("input")
    }

    pub fn job_work_output_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("work").join("output")
    }

    pub fn job_logs_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("logs")
    }

    pub fn job_stdout_path(&self, id: &JobId) -> PathBuf {
        self.job_logs_dir(id).join("stdout.log")
    }

    pub fn job_stderr_path(&self, id: &JobId) -> PathBuf {
        self.job_logs_dir(id).join("stderr.log")
    }

    pub fn job_field_path(&self, id: &JobId, field: &str) -> PathBuf {
        self.job_dir(id).join(field)
    }

    /// Creates the base-level directory tree. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        for dir in [self.jobs_dir(), self.locks_dir(), self.logs_dir()] {
            create_dir(&dir)?;
        }
        Ok(())
    }

    /// Creates the directory tree for one job. Idempotent.
    pub fn create_job_dirs(&self, id: &JobId) -> Result<()> {
        for dir in [
            self.job_work_input_dir(id),
            self.job_work_output_dir(id),
            self.job_logs_dir(id),
        ] {
            create_dir(&dir)?;
        }
        Ok(())
    }

    /// Removes a job's entire directory tree. Missing directories are not an error.
    pub fn delete_job_dir(&self, id: &JobId) -> Result<()> {
        let dir = self.job_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(dir, e)),
        }
    }

    /// Lists job ids currently present under `jobs/`, skipping any entry
    /// that isn't a directory.
    pub fn list_job_ids(&self) -> Result<Vec<JobId>> {
        let dir = self.jobs_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(dir.clone(), e))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(JobId::new(name));
                }
            }
        }
        Ok(ids)
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn initialize_creates_expected_tree() {
        let dir = tempdir().unwrap();
        let layout = DirLayout::new(dir.path());
        layout.initialize().unwrap();
        assert!(layout.jobs_dir().is_dir());
        assert!(layout.locks_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempdir().unwrap();
        let layout = DirLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
    }

    #[test]
    fn create_and_delete_job_dirs() {
        let dir = tempdir().unwrap();
        let layout = DirLayout::new(dir.path());
        layout.initialize().unwrap();
        let id = JobId::new("job-1");
        layout.create_job_dirs(&id).unwrap();
        assert!(layout.job_work_input_dir(&id).is_dir());
        assert!(layout.job_work_output_dir(&id).is_dir());
        assert!(layout.job_logs_dir(&id).is_dir());

        layout.delete_job_dir(&id).unwrap();
        assert!(!layout.job_dir(&id).exists());
        layout.delete_job_dir(&id).unwrap();
    }

    #[test]
    fn list_job_ids_skips_non_directories() {
        let dir = tempdir().unwrap();
        let layout = DirLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.create_job_dirs(&JobId::new("job-a")).unwrap();
        layout.create_job_dirs(&JobId::new("job-b")).unwrap();
        std::fs::write(layout.jobs_dir().join("stray-file"), "x").unwrap();

        let mut ids: Vec<String> = layout
            .list_job_ids()
            .unwrap()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["job-a".to_string(), "job-b".to_string()]);
    }
}
