//! Job identity, state machine, and per-job configuration.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a job, generated at creation and stable for its lifetime.
    pub struct JobId;
}

/// A job's position in its lifecycle. See the state machine in the data model:
/// QUEUED -> RUNNING -> {SUCCEEDED, FAILED, CANCELED, KILLED}, with FAILED
/// jobs able to loop back to QUEUED while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Killed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Canceled | JobState::Killed
        )
    }

    /// Parses the literal on-disk representation. Returns `None` for anything
    /// outside the six known values rather than guessing a mapping -- callers
    /// should log and skip the job, never delete it, on `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "succeeded" => Some(JobState::Succeeded),
            "failed" => Some(JobState::Failed),
            "canceled" => Some(JobState::Canceled),
            "killed" => Some(JobState::Killed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
            JobState::Killed => "killed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A process exit outcome. Either a real exit code from the child, or a
/// symbolic reason the runner or crash recovery assigned when there was no
/// exit code to observe (timeout, recovery kill, ...).
///
/// Serializes as the union its on-disk encoding requires: a bare integer
/// when numeric, the literal string otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExitCode {
    Numeric(i32),
    Symbolic(String),
}

impl ExitCode {
    pub const TIMEOUT: &'static str = "timeout";
    pub const KILLED_BY_RECOVERY: &'static str = "killed_by_recovery";
    pub const ORPHANED_PROCESS: &'static str = "orphaned_process";

    pub fn as_numeric(&self) -> Option<i32> {
        match self {
            ExitCode::Numeric(n) => Some(*n),
            ExitCode::Symbolic(_) => None,
        }
    }

    /// Always available: the integer rendered as a string, or the symbolic literal.
    pub fn as_display_str(&self) -> String {
        match self {
            ExitCode::Numeric(n) => n.to_string(),
            ExitCode::Symbolic(s) => s.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Numeric(0))
    }

    /// Parses either a bare decimal integer or takes the text as a symbolic code.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i32>() {
            Ok(n) => ExitCode::Numeric(n),
            Err(_) => ExitCode::Symbolic(raw.trim().to_string()),
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display_str())
    }
}

/// One entry in a job's append-only retry history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryHistoryEntry {
    pub attempt: u32,
    pub exit_code: ExitCode,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-job overrides for timeout and retry behavior. Every field has a
/// daemon-wide default (see `barn_daemon::config::Config`) that a submission
/// may override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Wall-clock seconds before the runner force-kills the child and
    /// records `ExitCode::Symbolic("timeout")`. `None` means no timeout.
    pub default_timeout_seconds: Option<u64>,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub retry_backoff_multiplier: f64,
    /// Empty means "retry on any nonzero exit". Non-empty restricts retry
    /// eligibility to exactly these numeric codes.
    pub retry_on_exit_codes: Vec<i32>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: None,
            max_retries: 0,
            retry_delay_seconds: 5,
            retry_backoff_multiplier: 2.0,
            retry_on_exit_codes: Vec::new(),
        }
    }
}

/// A submitted command and everything the daemon has learned about its
/// execution so far. Mirrors the on-disk layout field for field: every
/// attribute here maps to exactly one file under `jobs/<id>/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<ExitCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Ticks-since-boot process start time read from `/proc/<pid>/stat` at
    /// spawn (Unix only; `None` on platforms without it or if the read
    /// raced the child exiting). Recovery compares this against a fresh
    /// read at the same pid to tell "still our child" from a reused pid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_ticks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_history: Vec<RetryHistoryEntry>,
    pub job_config: JobConfig,
}

impl Job {
    /// Builds a freshly-queued job. Does not touch disk -- the repository
    /// is responsible for materializing the directory and files.
    pub fn new(id: JobId, command: Vec<String>, tag: Option<String>, job_config: JobConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            command,
            tag,
            state: JobState::Queued,
            created_at: now,
            started_at: None,
            finished_at: None,
            exit_code: None,
            error: None,
            pid: None,
            start_time_ticks: None,
            heartbeat: None,
            retry_count: 0,
            retry_at: None,
            retry_history: Vec::new(),
            job_config,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Checks invariants 3, 5, and 6 of the data model. Storage calls this
    /// before every durable write so a bug can't persist an inconsistent job.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.command.is_empty() {
            return Err(CoreError::EmptyCommand);
        }
        if self.retry_count > self.job_config.max_retries {
            return Err(CoreError::RetryCountExceedsMax {
                retry_count: self.retry_count,
                max_retries: self.job_config.max_retries,
            });
        }
        Ok(())
    }

    /// Whether this QUEUED job is eligible for dispatch right now: either it
    /// has never been delayed, or its `retry_at` has passed.
    pub fn eligible_for_dispatch(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.retry_at.map(|at| at <= now).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn state_round_trips_through_lowercase_literals() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Succeeded,
            JobState::Failed,
            JobState::Canceled,
            JobState::Killed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn unknown_state_literal_does_not_guess() {
        assert_eq!(JobState::parse("zombie"), None);
    }

    #[test]
    fn exit_code_parses_numeric_and_symbolic() {
        assert_eq!(ExitCode::parse("0"), ExitCode::Numeric(0));
        assert_eq!(ExitCode::parse("137"), ExitCode::Numeric(137));
        assert_eq!(
            ExitCode::parse("timeout"),
            ExitCode::Symbolic("timeout".to_string())
        );
    }

    #[test]
    fn exit_code_serializes_as_bare_union() {
        assert_eq!(serde_json::to_string(&ExitCode::Numeric(1)).unwrap(), "1");
        assert_eq!(
            serde_json::to_string(&ExitCode::Symbolic("timeout".into())).unwrap(),
            "\"timeout\""
        );
    }

    #[test]
    fn new_job_starts_queued_with_no_execution_fields() {
        let job = Job::new(
            JobId::new("job-1"),
            vec!["echo".into(), "hi".into()],
            None,
            JobConfig::default(),
            ts(1000),
        );
        assert_eq!(job.state, JobState::Queued);
        assert!(job.pid.is_none());
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
        assert!(job.exit_code.is_none());
    }

    #[test]
    fn validate_rejects_empty_command() {
        let job = Job::new(JobId::new("job-1"), vec![], None, JobConfig::default(), ts(0));
        assert!(matches!(job.validate(), Err(crate::error::CoreError::EmptyCommand)));
    }

    #[test]
    fn validate_rejects_retry_count_above_max() {
        let mut job = Job::new(
            JobId::new("job-1"),
            vec!["true".into()],
            None,
            JobConfig::default(),
            ts(0),
        );
        job.retry_count = 1;
        assert!(matches!(
            job.validate(),
            Err(crate::error::CoreError::RetryCountExceedsMax { .. })
        ));
    }

    #[test]
    fn eligible_for_dispatch_respects_retry_at() {
        let mut job = Job::new(
            JobId::new("job-1"),
            vec!["true".into()],
            None,
            JobConfig::default(),
            ts(1000),
        );
        assert!(job.eligible_for_dispatch(ts(1000)));
        job.retry_at = Some(ts(2000));
        assert!(!job.eligible_for_dispatch(ts(1500)));
        assert!(job.eligible_for_dispatch(ts(2000)));
    }
}
