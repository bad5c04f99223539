//! Job repository: CRUD over jobs-as-directories and state transitions
//! (spec 4.6), generalized from the teacher's job-directory-per-record idea
//! and the `JobDir` open/create/read/write shape in the pack's
//! `tumf-agent-exec::jobstore` module.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{Result, StorageError};
use crate::fields;
use crate::layout::DirLayout;
use barn_core::{Clock, ExitCode, IdGen, Job, JobConfig, JobId, JobState, RetryHistoryEntry};

pub struct JobRepository {
    layout: DirLayout,
    clock: Arc<dyn Clock>,
    id_gen: Arc<dyn IdGen>,
}

fn valid_transition(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Queued, Running)
            | (Running, Succeeded)
            | (Running, Failed)
            | (Running, Canceled)
            | (Running, Killed)
            | (Running, Queued) // retry
            | (Queued, Killed) // recovery, retries exhausted, never dispatched
            | (Queued, Canceled) // kill of a not-yet-running job
    )
}

impl JobRepository {
    pub fn new(layout: DirLayout, clock: Arc<dyn Clock>, id_gen: Arc<dyn IdGen>) -> Self {
        Self {
            layout,
            clock,
            id_gen,
        }
    }

    pub fn layout(&self) -> &DirLayout {
        &self.layout
    }

    /// Materializes a new QUEUED job directory with all initial fields.
    pub fn create(&self, command: Vec<String>, tag: Option<String>, config: JobConfig) -> Result<Job> {
        let id = JobId::new(self.id_gen.next());
        let now = self.clock.now();
        let job = Job::new(id.clone(), command, tag, config, now);
        job.validate()?;

        self.layout.create_job_dirs(&id)?;
        fields::write_command(&self.layout, &id, &job.command)?;
        if let Some(tag) = &job.tag {
            fields::write_tag(&self.layout, &id, Some(tag))?;
        }
        fields::write_created_at(&self.layout, &id, job.created_at)?;
        fields::write_job_config(&self.layout, &id, &job.job_config)?;
        fields::write_retry_count(&self.layout, &id, 0)?;
        // State is written last: a crash before this point leaves a
        // directory with no state file, which `find_by_id`/`find_all`
        // correctly treat as absent.
        fields::write_state(&self.layout, &id, JobState::Queued)?;

        Ok(job)
    }

    /// Reads every state file for `id`. A missing `state` file (including a
    /// create that crashed before finishing) is treated as absent.
    pub fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        match fields::read_job(&self.layout, id) {
            Ok(job) => Ok(job),
            Err(StorageError::Corrupt { id, detail }) => {
                warn!(job_id = %id, detail, "skipping partially-initialized or corrupt job directory");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Enumerates every job directory. Per-entry read errors are logged and
    /// skipped rather than failing the whole listing.
    pub fn find_all(&self) -> Result<Vec<Job>> {
        let ids = self.layout.list_job_ids()?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.find_by_id(&id) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => {
                    warn!(job_id = %id, error = %e, "skipping job with read error");
                }
            }
        }
        Ok(jobs)
    }

    pub fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|j| j.state == state)
            .collect())
    }

    fn transition(&self, id: &JobId, from_expected: JobState, to: JobState) -> Result<()> {
        let current = fields::read_state(&self.layout, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if current != from_expected || !valid_transition(current, to) {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to,
            });
        }
        fields::write_state(&self.layout, id, to)
    }

    /// QUEUED -> RUNNING. PID and heartbeat are written before `state` is
    /// flipped, honoring invariant 4 (a RUNNING job has a PID promptly).
    /// `start_time_ticks` is the spawning runner's best-effort read of the
    /// child's `/proc/<pid>/stat` start time (spec 9's PID-reuse guard);
    /// `None` when the platform doesn't expose it.
    pub fn mark_started(&self, id: &JobId, pid: u32, start_time_ticks: Option<u64>) -> Result<()> {
        let current = fields::read_state(&self.layout, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if current != JobState::Queued {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: JobState::Running,
            });
        }
        let now = self.clock.now();
        fields::write_started_at(&self.layout, id, now)?;
        fields::write_pid(&self.layout, id, pid)?;
        fields::write_start_time_ticks(&self.layout, id, start_time_ticks)?;
        fields::write_heartbeat(&self.layout, id, now)?;
        fields::write_state(&self.layout, id, JobState::Running)
    }

    pub fn update_heartbeat(&self, id: &JobId, ts: DateTime<Utc>) -> Result<()> {
        fields::write_heartbeat(&self.layout, id, ts)
    }

    /// Writes data fields before `state`, per the ordering rule in spec 4.6:
    /// a crash between data writes and the state write leaves the job
    /// RUNNING, which crash recovery correctly reconciles on next startup.
    pub fn mark_completed(&self, id: &JobId, exit_code: ExitCode, error: Option<String>) -> Result<()> {
        let terminal = if exit_code.is_success() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        self.write_terminal(id, JobState::Running, terminal, Some(exit_code), error)
    }

    /// RUNNING -> CANCELED, from an IPC kill request.
    pub fn mark_canceled(&self, id: &JobId, error: Option<String>) -> Result<()> {
        let current = fields::read_state(&self.layout, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        self.write_terminal(id, current, JobState::Canceled, None, error)
    }

    /// Any non-terminal state -> KILLED, from crash recovery when no
    /// retries remain.
    pub fn mark_killed(&self, id: &JobId, reason: impl Into<String>) -> Result<()> {
        let current = fields::read_state(&self.layout, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        self.write_terminal(
            id,
            current,
            JobState::Killed,
            Some(ExitCode::Symbolic(ExitCode::KILLED_BY_RECOVERY.to_string())),
            Some(reason.into()),
        )
    }

    fn write_terminal(
        &self,
        id: &JobId,
        from_expected: JobState,
        to: JobState,
        exit_code: Option<ExitCode>,
        error: Option<String>,
    ) -> Result<()> {
        let current = fields::read_state(&self.layout, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if current != from_expected || !valid_transition(current, to) {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to,
            });
        }
        fields::write_finished_at(&self.layout, id, self.clock.now())?;
        if let Some(exit_code) = &exit_code {
            fields::write_exit_code(&self.layout, id, exit_code)?;
        }
        if error.is_some() {
            fields::write_error(&self.layout, id, error.as_deref())?;
        }
        fields::write_state(&self.layout, id, to)
    }

    /// RUNNING -> QUEUED with incremented retry bookkeeping (used by both
    /// the runner's own retry path and crash recovery).
    pub fn requeue_for_retry(
        &self,
        id: &JobId,
        from_expected: JobState,
        retry_count: u32,
        retry_at: DateTime<Utc>,
        history_entry: RetryHistoryEntry,
    ) -> Result<()> {
        let current = fields::read_state(&self.layout, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if current != from_expected || !valid_transition(current, JobState::Queued) {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: JobState::Queued,
            });
        }
        fields::write_finished_at(&self.layout, id, self.clock.now())?;
        fields::write_exit_code(&self.layout, id, &history_entry.exit_code)?;
        fields::append_retry_history(&self.layout, id, &history_entry)?;
        fields::write_retry_count(&self.layout, id, retry_count)?;
        fields::write_retry_at(&self.layout, id, Some(retry_at))?;
        fields::write_state(&self.layout, id, JobState::Queued)
    }

    /// Low-level transition with validation, used by the IPC kill handler.
    pub fn update_state(&self, id: &JobId, new_state: JobState) -> Result<()> {
        let current = fields::read_state(&self.layout, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        self.transition(id, current, new_state)
    }

    /// Removes a job's directory. Rejects RUNNING and QUEUED jobs -- only
    /// terminal jobs may be deleted.
    pub fn delete(&self, id: &JobId) -> Result<()> {
        let current = fields::read_state(&self.layout, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if !current.is_terminal() {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: current,
            });
        }
        self.layout.delete_job_dir(id)
    }
}
