//! Tracing setup and log rotation (spec 4.16), grounded in the teacher's
//! `main.rs` (`setup_logging`, `rotate_log_if_needed`): a non-blocking file
//! appender plus an `EnvFilter`, with rotation checked once at startup rather
//! than on every write.

use std::path::Path;

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file size above which the daemon rotates before opening its appender.
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated generations kept (`barn.log.1` .. `barn.log.3`).
const MAX_ROTATED_LOGS: u32 = 3;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("log path {0} has no parent directory")]
    NoParent(std::path::PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shifts `barn.log` -> `barn.log.1` -> ... -> `barn.log.{MAX_ROTATED_LOGS}`,
/// dropping the oldest generation. Best-effort: a failed rename is silently
/// skipped so a rotation problem never prevents the daemon from starting.
pub fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Initializes the global tracing subscriber: `log_level` from configuration
/// sets the default filter, overridable by `RUST_LOG` (spec 4.16). Returns
/// the `WorkerGuard` the non-blocking writer needs kept alive for the
/// process's lifetime -- dropping it would stop flushing log lines.
pub fn setup_logging(log_path: &Path, log_level: &str) -> Result<tracing_appender::non_blocking::WorkerGuard, LoggingError> {
    let parent = log_path.parent().ok_or_else(|| LoggingError::NoParent(log_path.to_path_buf()))?;
    std::fs::create_dir_all(parent)?;
    let file_name = log_path.file_name().ok_or_else(|| LoggingError::NoParent(log_path.to_path_buf()))?;

    let file_appender = tracing_appender::rolling::never(parent, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_is_a_noop_below_the_size_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("barn.log");
        std::fs::write(&log_path, b"small").unwrap();
        rotate_log_if_needed(&log_path);
        assert!(log_path.exists());
        assert!(!dir.path().join("barn.log.1").exists());
    }

    #[test]
    fn rotation_shifts_an_oversized_log_to_gen_1() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("barn.log");
        std::fs::write(&log_path, vec![b'x'; MAX_LOG_SIZE as usize + 1]).unwrap();
        rotate_log_if_needed(&log_path);
        assert!(!log_path.exists());
        assert!(dir.path().join("barn.log.1").exists());
    }

    #[test]
    fn missing_log_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        rotate_log_if_needed(&dir.path().join("does-not-exist.log"));
    }
}
