//! Engine-level error taxonomy: wraps storage errors and adds the
//! process-spawn/log-file failures unique to running a job's child process.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] barn_storage::StorageError),

    #[error("failed to spawn child for job {id}: {source}")]
    Spawn {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log file at {path}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
