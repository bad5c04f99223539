//! The dispatch loop (spec 4.11): polls on a fixed interval, orders QUEUED
//! jobs FIFO by `created_at` (ties broken by id), and hands each eligible
//! job to the runner once its lock is acquired and the concurrency cap
//! leaves room. Single instance per daemon; the caller (daemon lifecycle)
//! is responsible for holding the scheduler lock for as long as this runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use barn_core::{Clock, JobState};
use barn_storage::{FileLock, JobRepository};

use crate::process;
use crate::runner::JobRunner;

pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    pub poll_interval: Duration,
}

/// Polls the repository for work and dispatches it. `max_concurrent_jobs`
/// is reloadable at runtime (spec 4.15's `service reload`), so it's held in
/// an `AtomicUsize` rather than baked into `SchedulerConfig` at construction.
pub struct Scheduler {
    repo: Arc<JobRepository>,
    runner: Arc<JobRunner>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_concurrent_jobs: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    shutdown: Notify,
    stopping: AtomicBool,
}

impl Scheduler {
    pub fn new(repo: Arc<JobRepository>, runner: Arc<JobRunner>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            repo,
            runner,
            clock,
            poll_interval: config.poll_interval,
            max_concurrent_jobs: AtomicUsize::new(config.max_concurrent_jobs),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown: Notify::new(),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn set_max_concurrent_jobs(&self, n: usize) {
        self.max_concurrent_jobs.store(n, Ordering::Relaxed);
    }

    /// Runs the poll loop until `request_shutdown` is called. Intended to be
    /// driven as one long-lived `tokio::spawn`ed task for the daemon's life.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.notified() => break,
            }
            if self.stopping.load(Ordering::Relaxed) {
                break;
            }
            self.dispatch_once();
        }
    }

    pub fn request_shutdown(&self) {
        self.stopping.store(true, Ordering::Relaxed);
        self.shutdown.notify_one();
    }

    /// Graceful-then-forced shutdown of in-flight jobs (spec 4.14): wait up
    /// to `grace` for runner tasks to finish on their own; anything still
    /// RUNNING afterward is force-killed if `force` is set.
    pub async fn shutdown(&self, grace: Duration, force: bool) {
        self.request_shutdown();
        let deadline = tokio::time::Instant::now() + grace;
        while self.in_flight.load(Ordering::Relaxed) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.in_flight.load(Ordering::Relaxed) == 0 {
            return;
        }
        if !force {
            warn!("shutdown grace period elapsed with jobs still running, leaving them for next recovery");
            return;
        }
        match self.repo.find_by_state(JobState::Running) {
            Ok(running) => {
                for job in running {
                    if let Some(pid) = job.pid {
                        warn!(job_id = %job.id, pid, "force-killing job at shutdown");
                        process::kill_tree(pid, true);
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to list running jobs during forced shutdown"),
        }
    }

    fn dispatch_once(&self) {
        let running_count = match self.repo.find_by_state(JobState::Running) {
            Ok(jobs) => jobs.len(),
            Err(e) => {
                warn!(error = %e, "failed to count running jobs, skipping this dispatch cycle");
                return;
            }
        };
        let max = self.max_concurrent_jobs.load(Ordering::Relaxed);
        if running_count >= max {
            return;
        }
        let mut capacity = max - running_count;

        let now = self.clock.now();
        let mut queued = match self.repo.find_by_state(JobState::Queued) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "failed to list queued jobs, skipping this dispatch cycle");
                return;
            }
        };
        queued.retain(|j| j.eligible_for_dispatch(now));
        queued.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));

        for job in queued {
            if capacity == 0 {
                break;
            }
            let lock_path = self.repo.layout().job_lock_path(&job.id);
            match FileLock::try_acquire(lock_path) {
                Ok(Some(lock)) => {
                    capacity -= 1;
                    self.in_flight.fetch_add(1, Ordering::Relaxed);
                    let runner = Arc::clone(&self.runner);
                    let in_flight = Arc::clone(&self.in_flight);
                    let job_id = job.id.clone();
                    tokio::spawn(async move {
                        runner.execute(job, lock).await;
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    });
                    info!(job_id = %job_id, "dispatched job");
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "failed to acquire job lock, skipping");
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barn_core::test_support::{FakeClock, SequentialIdGen};
    use barn_core::JobConfig;
    use barn_storage::DirLayout;
    use chrono::TimeZone;

    fn setup() -> (tempfile::TempDir, Arc<JobRepository>, Arc<FakeClock>) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DirLayout::new(dir.path());
        layout.initialize().unwrap();
        let clock = Arc::new(FakeClock::new(chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let repo = Arc::new(JobRepository::new(layout, clock.clone(), Arc::new(SequentialIdGen::default())));
        (dir, repo, clock)
    }

    #[tokio::test]
    async fn dispatches_a_queued_job() {
        let (_dir, repo, clock) = setup();
        let job = repo.create(vec!["true".into()], None, JobConfig::default()).unwrap();
        let runner = Arc::new(JobRunner::new(repo.clone(), clock.clone(), Duration::from_millis(50)));
        let scheduler = Arc::new(Scheduler::new(
            repo.clone(),
            runner,
            clock,
            SchedulerConfig {
                max_concurrent_jobs: 4,
                poll_interval: Duration::from_millis(10),
            },
        ));
        scheduler.dispatch_once();
        // Give the spawned runner task a moment to run the trivial command.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let found = repo.find_by_id(&job.id).unwrap().unwrap();
        assert_ne!(found.state, JobState::Queued);
    }

    #[tokio::test]
    async fn respects_concurrency_cap() {
        let (_dir, repo, clock) = setup();
        for _ in 0..3 {
            repo.create(vec!["sleep".into(), "5".into()], None, JobConfig::default()).unwrap();
        }
        let runner = Arc::new(JobRunner::new(repo.clone(), clock.clone(), Duration::from_millis(50)));
        let scheduler = Arc::new(Scheduler::new(
            repo.clone(),
            runner,
            clock,
            SchedulerConfig {
                max_concurrent_jobs: 1,
                poll_interval: Duration::from_millis(10),
            },
        ));
        scheduler.dispatch_once();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let running = repo.find_by_state(JobState::Running).unwrap();
        assert_eq!(running.len(), 1);
    }
}
