//! Runs one job end to end (spec 4.8): acquire-verified dispatch, spawn,
//! heartbeat, wait-with-timeout, terminal-or-requeue. Lock ownership is
//! handed in by the scheduler and held for the runner's lifetime so the
//! lock's `Drop` releases it the instant the job stops running, whatever the
//! outcome.

use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use barn_core::{decide, Clock, ExitCode, Job, JobState, RetryDecision, RetryHistoryEntry};
use barn_storage::{FileLock, JobRepository, StorageError};

use crate::error::{EngineError, Result};
use crate::process;

/// How often a running job's heartbeat file is refreshed. The scheduler
/// derives this from the configured stale-heartbeat threshold (spec 4.7
/// recommends roughly a third of it) and shares one runner across all jobs.
pub struct JobRunner {
    repo: Arc<JobRepository>,
    clock: Arc<dyn Clock>,
    heartbeat_interval: Duration,
}

impl JobRunner {
    pub fn new(repo: Arc<JobRepository>, clock: Arc<dyn Clock>, heartbeat_interval: Duration) -> Self {
        Self {
            repo,
            clock,
            heartbeat_interval,
        }
    }

    /// Drives `job` from RUNNING to a terminal state or back to QUEUED for
    /// retry. `lock` is the job's advisory lock, acquired by the scheduler
    /// before dispatch; it's held until this future completes.
    pub async fn execute(&self, job: Job, lock: FileLock) {
        let id = job.id.clone();
        if let Err(e) = self.execute_inner(job, &lock).await {
            warn!(job_id = %id, error = %e, "job runner failed");
        }
        drop(lock);
    }

    async fn execute_inner(&self, job: Job, _lock: &FileLock) -> Result<()> {
        // Re-check eligibility: the job could have been canceled or already
        // picked up between the scheduler's scan and this task starting.
        match self.repo.find_by_id(&job.id)? {
            Some(current) if current.state == JobState::Queued => {}
            _ => {
                debug!(job_id = %job.id, "job no longer eligible for dispatch, declining");
                return Ok(());
            }
        }

        let stdout_path = self.repo.layout().job_stdout_path(&job.id);
        let stderr_path = self.repo.layout().job_stderr_path(&job.id);
        let stdout = open_append(&stdout_path)?;
        let stderr = open_append(&stderr_path)?;

        let mut cmd = tokio::process::Command::new(&job.command[0]);
        cmd.args(&job.command[1..]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(stdout));
        cmd.stderr(Stdio::from(stderr));
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            id: job.id.to_string(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);

        let start_time_ticks = process::start_time_ticks(pid);
        self.repo.mark_started(&job.id, pid, start_time_ticks)?;
        info!(job_id = %job.id, pid, "job started");

        let heartbeat_task = {
            let repo = Arc::clone(&self.repo);
            let id = job.id.clone();
            let interval = self.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // first tick fires immediately; skip it, mark_started already stamped one
                loop {
                    ticker.tick().await;
                    if let Err(e) = repo.update_heartbeat(&id, Utc::now()) {
                        warn!(job_id = %id, error = %e, "failed to update heartbeat");
                    }
                }
            })
        };

        let timeout = job.job_config.default_timeout_seconds.map(Duration::from_secs);
        let wait_result = match timeout {
            Some(d) => tokio::time::timeout(d, child.wait()).await,
            None => Ok(child.wait().await),
        };

        heartbeat_task.abort();

        let exit_code = match wait_result {
            Ok(Ok(status)) => exit_code_from_status(status),
            Ok(Err(io_err)) => {
                warn!(job_id = %job.id, error = %io_err, "error waiting on child");
                ExitCode::Symbolic("wait_failed".to_string())
            }
            Err(_elapsed) => {
                warn!(job_id = %job.id, pid, "job exceeded its timeout, force-killing");
                process::kill_tree(pid, true);
                let _ = child.wait().await;
                ExitCode::Symbolic(ExitCode::TIMEOUT.to_string())
            }
        };

        self.finish(&job, exit_code).await
    }

    /// Records the outcome, honoring a concurrent cancellation: if the IPC
    /// kill handler already transitioned the job to CANCELED while it was
    /// running, that transition wins and this call is a no-op.
    async fn finish(&self, job: &Job, exit_code: ExitCode) -> Result<()> {
        if exit_code.is_success() {
            return self.complete_or_ignore_canceled(job, exit_code, None);
        }

        let now = self.clock.now();
        let decision = decide(&exit_code, job.retry_count, &job.job_config, now);
        match decision {
            RetryDecision::Exhausted => {
                let error = Some(format!("exited with {exit_code}, no retries remaining"));
                self.complete_or_ignore_canceled(job, exit_code, error)
            }
            RetryDecision::Retry { retry_at } => {
                let entry = RetryHistoryEntry {
                    attempt: job.retry_count + 1,
                    exit_code,
                    finished_at: now,
                    error: None,
                };
                match self
                    .repo
                    .requeue_for_retry(&job.id, JobState::Running, job.retry_count + 1, retry_at, entry)
                {
                    Ok(()) => {
                        info!(job_id = %job.id, retry_at = %retry_at, "job failed, scheduled for retry");
                        Ok(())
                    }
                    Err(StorageError::InvalidTransition { .. }) => {
                        debug!(job_id = %job.id, "job was canceled before retry could be recorded");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn complete_or_ignore_canceled(&self, job: &Job, exit_code: ExitCode, error: Option<String>) -> Result<()> {
        match self.repo.mark_completed(&job.id, exit_code, error) {
            Ok(()) => Ok(()),
            Err(StorageError::InvalidTransition { .. }) => {
                debug!(job_id = %job.id, "job was canceled before completion could be recorded");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn open_append(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EngineError::LogOpen {
            path: path.to_path_buf(),
            source,
        })
}

fn exit_code_from_status(status: std::process::ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => ExitCode::Numeric(code),
        // No exit code means the process was killed by a signal (Unix) or
        // terminated abnormally (Windows): there's no integer to report.
        None => ExitCode::Symbolic("terminated_by_signal".to_string()),
    }
}
