//! Startup/shutdown sequencing (spec 4.14), grounded in the teacher's
//! `lifecycle/mod.rs` (`startup`/`startup_inner` split, lock-then-init-then
//! recover ordering, socket bound last). Barn's sequence is shorter since
//! there is no WAL/snapshot to replay: the job repository *is* the durable
//! state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing::info;

use barn_core::{Clock, SystemClock, UuidIdGen};
use barn_engine::{recovery, CleanupConfig, CleanupScheduler, JobRunner, RecoveryReport, Scheduler, SchedulerConfig};
use barn_storage::{DirLayout, FileLock, JobRepository, StorageError};

use crate::config::Config;
use crate::listener::{heartbeat_interval_from_threshold, ListenCtx};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another barn daemon is already running against this base directory")]
    AlreadyRunning,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] barn_engine::EngineError),

    #[error("failed to bind socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the daemon holds for its lifetime. Dropping it releases the
/// scheduler lock last, after every other handle, matching the reverse
/// shutdown order spec 4.14 requires.
pub struct Daemon {
    pub config: Config,
    pub layout: DirLayout,
    pub repo: Arc<JobRepository>,
    pub scheduler: Arc<Scheduler>,
    pub cleanup: Arc<CleanupScheduler>,
    /// Whether the periodic cleanup sweep should actually be spawned; the
    /// scheduler object itself is always built so `clean_jobs` IPC requests
    /// work even when the background timer is disabled.
    pub cleanup_enabled: bool,
    pub listen_ctx: Arc<ListenCtx>,
    pub shutdown: Arc<Notify>,
    pub recovery_report: RecoveryReport,
    _scheduler_lock: FileLock,
}

pub struct StartupResult {
    pub daemon: Daemon,
    pub listener_socket: UnixListener,
}

/// Runs the spec 4.14 startup sequence: acquire the scheduler lock, lay out
/// the directory tree, run crash recovery while the lock is held, build the
/// scheduler and cleanup sweep, then bind the IPC socket last so a client
/// never connects to a daemon that isn't fully wired up yet.
pub async fn startup(config: Config, config_path: Option<PathBuf>) -> Result<StartupResult, LifecycleError> {
    let layout = DirLayout::new(&config.base_dir);
    layout.initialize()?;

    let scheduler_lock = FileLock::try_acquire(layout.scheduler_lock_path())?.ok_or(LifecycleError::AlreadyRunning)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repo = Arc::new(JobRepository::new(layout.clone(), clock.clone(), Arc::new(UuidIdGen)));

    let stale_threshold = ChronoDuration::seconds(config.stale_heartbeat_threshold_seconds as i64);
    let recovery_report = recovery::recover(&repo, &*clock, stale_threshold)?;
    if recovery_report.requeued > 0 || recovery_report.killed > 0 || recovery_report.anomalies > 0 {
        info!(
            requeued = recovery_report.requeued,
            killed = recovery_report.killed,
            anomalies = recovery_report.anomalies,
            "crash recovery reconciled orphaned jobs"
        );
    }

    let heartbeat_interval = heartbeat_interval_from_threshold(stale_threshold);
    let runner = Arc::new(JobRunner::new(repo.clone(), clock.clone(), heartbeat_interval));
    let scheduler = Arc::new(Scheduler::new(
        repo.clone(),
        runner,
        clock.clone(),
        SchedulerConfig {
            max_concurrent_jobs: config.max_concurrent_jobs,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
        },
    ));

    let max_age_failed = config
        .cleanup
        .keep_failed_jobs
        .then(|| ChronoDuration::hours(config.cleanup.keep_failed_jobs_hours as i64));
    let cleanup = Arc::new(CleanupScheduler::new(
        repo.clone(),
        clock.clone(),
        CleanupConfig {
            interval: Duration::from_secs(config.cleanup.cleanup_interval_minutes * 60),
            max_age: ChronoDuration::hours(config.cleanup.max_age_hours as i64),
            max_age_failed,
        },
    ));

    let socket_path = config.ipc_socket_path();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener_socket =
        UnixListener::bind(&socket_path).map_err(|source| LifecycleError::Bind { path: socket_path.clone(), source })?;

    let shutdown = Arc::new(Notify::new());
    let listen_ctx = Arc::new(ListenCtx {
        repo: repo.clone(),
        scheduler: scheduler.clone(),
        cleanup: cleanup.clone(),
        clock: clock.clone(),
        job_defaults: Mutex::new(config.default_job_config()),
        config_path,
        start_time: Instant::now(),
        shutdown: shutdown.clone(),
    });

    let cleanup_enabled = config.cleanup.enabled;
    Ok(StartupResult {
        daemon: Daemon {
            config,
            layout,
            repo,
            scheduler,
            cleanup,
            cleanup_enabled,
            listen_ctx,
            shutdown,
            recovery_report,
            _scheduler_lock: scheduler_lock,
        },
        listener_socket,
    })
}

impl Daemon {
    /// Reverse shutdown order (spec 4.14): the IPC listener stops accepting
    /// as soon as its task is dropped/aborted by the caller; here we stop the
    /// cleanup sweep, then wait for in-flight runners, then let the scheduler
    /// lock release on drop once this call returns.
    pub async fn stop(&self, grace: Duration, force: bool) {
        self.cleanup.request_shutdown();
        self.scheduler.shutdown(grace, force).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.base_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn startup_acquires_the_scheduler_lock() {
        let dir = tempfile::tempdir().unwrap();
        let result = startup(config_for(dir.path()), None).await.unwrap();
        assert!(dir.path().join("locks").join("scheduler.lock").exists());
        assert!(dir.path().join("barn.sock").exists());
        drop(result);
    }

    #[tokio::test]
    async fn second_startup_against_the_same_base_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let first = startup(config_for(dir.path()), None).await.unwrap();
        let second = startup(config_for(dir.path()), None).await;
        assert!(matches!(second, Err(LifecycleError::AlreadyRunning)));
        drop(first);
    }

    #[tokio::test]
    async fn lock_is_released_after_drop_allowing_a_fresh_startup() {
        let dir = tempfile::tempdir().unwrap();
        let first = startup(config_for(dir.path()), None).await.unwrap();
        drop(first);
        let second = startup(config_for(dir.path()), None).await;
        assert!(second.is_ok());
    }
}
