//! Validation errors for types constructed outside of storage/engine I/O paths.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("command must be a non-empty argv list")]
    EmptyCommand,
    #[error("max_retries exceeded by retry_count ({retry_count} > {max_retries})")]
    RetryCountExceedsMax { retry_count: u32, max_retries: u32 },
}
