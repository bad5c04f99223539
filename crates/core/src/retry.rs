//! Exit-code-based retry decision with exponential backoff.
//!
//! Pure function over `(exit_code, retry_count, config, now)` -- no I/O, no
//! clock reads. The engine supplies `now` so scheduling stays testable.

use crate::job::{ExitCode, JobConfig};
use chrono::{DateTime, Duration, Utc};

/// Caps the computed backoff delay so a high retry count can't schedule a
/// retry days out. Matches the "implementation-defined max, e.g. 1 hour"
/// the retry policy allows.
pub const MAX_RETRY_DELAY_SECONDS: i64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Terminal: FAILED. No further attempts.
    Exhausted,
    /// Retry: caller should requeue with the given `retry_at`.
    Retry { retry_at: DateTime<Utc> },
}

/// Decides whether a completed attempt should be retried.
///
/// `retry_count` is the count *before* this attempt's failure is recorded
/// (i.e. the number of prior attempts). A success (`exit_code.is_success()`)
/// is never passed here -- callers only consult this after a failed attempt.
pub fn decide(exit_code: &ExitCode, retry_count: u32, config: &JobConfig, now: DateTime<Utc>) -> RetryDecision {
    if exit_code.is_success() {
        return RetryDecision::Exhausted;
    }
    if retry_count >= config.max_retries {
        return RetryDecision::Exhausted;
    }
    if !config.retry_on_exit_codes.is_empty() {
        // Symbolic codes are always considered retryable when the allow-list
        // is non-empty and doesn't name them explicitly (unspecified codes
        // are retryable iff retries remain, per spec 4.10).
        if let ExitCode::Numeric(n) = exit_code {
            if !config.retry_on_exit_codes.contains(n) {
                return RetryDecision::Exhausted;
            }
        }
    }

    let delay_seconds = backoff_seconds(config.retry_delay_seconds, config.retry_backoff_multiplier, retry_count);
    RetryDecision::Retry {
        retry_at: now + Duration::seconds(delay_seconds),
    }
}

fn backoff_seconds(base_delay: u64, multiplier: f64, retry_count: u32) -> i64 {
    let factor = multiplier.powi(retry_count as i32);
    let seconds = (base_delay as f64) * factor;
    if !seconds.is_finite() || seconds < 0.0 {
        return MAX_RETRY_DELAY_SECONDS;
    }
    (seconds as i64).min(MAX_RETRY_DELAY_SECONDS)
}
