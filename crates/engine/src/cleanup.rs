//! Age-based retention sweep for terminal jobs (spec 4.12). Runs on its own
//! timer, independent of the dispatch loop, and supports a dry-run mode for
//! the CLI's `clean --dry-run`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Notify;
use tracing::{info, warn};

use barn_core::{Clock, Job, JobId, JobState};
use barn_storage::JobRepository;

pub struct CleanupConfig {
    pub interval: Duration,
    /// Minimum age (from `finished_at`) before a terminal job is deleted.
    pub max_age: ChronoDuration,
    /// Optional separate, usually longer, retention for FAILED/KILLED jobs
    /// so their logs survive long enough to be inspected.
    pub max_age_failed: Option<ChronoDuration>,
}

pub struct CleanupScheduler {
    repo: Arc<JobRepository>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    max_age: ChronoDuration,
    max_age_failed: ChronoDuration,
    shutdown: Notify,
}

impl CleanupScheduler {
    pub fn new(repo: Arc<JobRepository>, clock: Arc<dyn Clock>, config: CleanupConfig) -> Self {
        let max_age_failed = config.max_age_failed.unwrap_or(config.max_age);
        Self {
            repo,
            clock,
            interval: config.interval,
            max_age: config.max_age,
            max_age_failed,
            shutdown: Notify::new(),
        }
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.notified() => break,
            }
            match self.sweep() {
                Ok(deleted) if !deleted.is_empty() => {
                    info!(count = deleted.len(), "cleanup swept terminal jobs");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "cleanup sweep failed"),
            }
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Jobs eligible for deletion right now, without deleting them. Used by
    /// both `sweep` and the CLI's dry-run mode.
    pub fn candidates(&self) -> barn_storage::Result<Vec<JobId>> {
        let now = self.clock.now();
        Ok(self
            .repo
            .find_all()?
            .into_iter()
            .filter(|job| self.is_expired(job, now))
            .map(|job| job.id)
            .collect())
    }

    /// Deletes every expired terminal job and returns the ids actually
    /// removed. A job that changes state between `candidates` and the
    /// delete call (impossible for a terminal job, but checked anyway) is
    /// skipped rather than treated as an error.
    pub fn sweep(&self) -> barn_storage::Result<Vec<JobId>> {
        let mut deleted = Vec::new();
        for id in self.candidates()? {
            match self.repo.delete(&id) {
                Ok(()) => deleted.push(id),
                Err(e) => warn!(job_id = %id, error = %e, "failed to delete job during cleanup sweep"),
            }
        }
        Ok(deleted)
    }

    fn is_expired(&self, job: &Job, now: DateTime<Utc>) -> bool {
        if !job.is_terminal() {
            return false;
        }
        let threshold = match job.state {
            JobState::Failed | JobState::Killed => self.max_age_failed,
            _ => self.max_age,
        };
        let base = job.finished_at.unwrap_or(job.created_at);
        now - base > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barn_core::test_support::{FakeClock, SequentialIdGen};
    use barn_core::{ExitCode, JobConfig};
    use barn_storage::DirLayout;
    use chrono::TimeZone;

    fn setup() -> (tempfile::TempDir, Arc<JobRepository>, Arc<FakeClock>) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DirLayout::new(dir.path());
        layout.initialize().unwrap();
        let clock = Arc::new(FakeClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let repo = Arc::new(JobRepository::new(layout, clock.clone(), Arc::new(SequentialIdGen::default())));
        (dir, repo, clock)
    }

    #[test]
    fn old_terminal_job_is_deleted() {
        let (_dir, repo, clock) = setup();
        let job = repo.create(vec!["true".into()], None, JobConfig::default()).unwrap();
        repo.mark_started(&job.id, 1, None).unwrap();
        repo.mark_completed(&job.id, ExitCode::Numeric(0), None).unwrap();

        clock.advance(ChronoDuration::days(2));
        let sweeper = CleanupScheduler::new(
            repo.clone(),
            clock,
            CleanupConfig {
                interval: Duration::from_secs(60),
                max_age: ChronoDuration::days(1),
                max_age_failed: None,
            },
        );
        let deleted = sweeper.sweep().unwrap();
        assert_eq!(deleted, vec![job.id.clone()]);
        assert_eq!(repo.find_by_id(&job.id).unwrap(), None);
    }

    #[test]
    fn recent_terminal_job_is_kept() {
        let (_dir, repo, clock) = setup();
        let job = repo.create(vec!["true".into()], None, JobConfig::default()).unwrap();
        repo.mark_started(&job.id, 1, None).unwrap();
        repo.mark_completed(&job.id, ExitCode::Numeric(0), None).unwrap();

        let sweeper = CleanupScheduler::new(
            repo.clone(),
            clock,
            CleanupConfig {
                interval: Duration::from_secs(60),
                max_age: ChronoDuration::days(1),
                max_age_failed: None,
            },
        );
        assert!(sweeper.sweep().unwrap().is_empty());
    }

    #[test]
    fn non_terminal_job_is_never_a_candidate() {
        let (_dir, repo, clock) = setup();
        repo.create(vec!["true".into()], None, JobConfig::default()).unwrap();
        clock.advance(ChronoDuration::days(30));

        let sweeper = CleanupScheduler::new(
            repo.clone(),
            clock,
            CleanupConfig {
                interval: Duration::from_secs(60),
                max_age: ChronoDuration::days(1),
                max_age_failed: None,
            },
        );
        assert!(sweeper.candidates().unwrap().is_empty());
    }

    #[test]
    fn failed_jobs_use_their_own_retention_window() {
        let (_dir, repo, clock) = setup();
        let job = repo.create(vec!["false".into()], None, JobConfig::default()).unwrap();
        repo.mark_started(&job.id, 1, None).unwrap();
        repo.mark_completed(&job.id, ExitCode::Numeric(1), Some("boom".into())).unwrap();

        clock.advance(ChronoDuration::days(2));
        let sweeper = CleanupScheduler::new(
            repo.clone(),
            clock,
            CleanupConfig {
                interval: Duration::from_secs(60),
                max_age: ChronoDuration::days(1),
                max_age_failed: Some(ChronoDuration::days(7)),
            },
        );
        assert!(sweeper.candidates().unwrap().is_empty());
    }
}
