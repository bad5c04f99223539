//! Storage error taxonomy. Maps to the wire error codes in the IPC layer:
//! `NotFound` -> `JOB_NOT_FOUND`, `InvalidTransition`/`LockContended` ->
//! `INVALID_STATE`/`LOCK_CONTENDED`, everything else -> `STORAGE_ERROR`.

use barn_core::JobState;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobState,
        to: JobState,
    },

    #[error("could not acquire lock at {0}")]
    LockContended(PathBuf),

    #[error("job directory for {id} is corrupt: {detail}")]
    Corrupt { id: String, detail: String },

    #[error(transparent)]
    Core(#[from] barn_core::CoreError),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
