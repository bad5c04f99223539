//! Crash recovery (spec 4.9): run once at startup, before the scheduler
//! accepts new dispatches, while the scheduler lock is held. Grounded in
//! `815ce33f_..._recovery.rs`'s `RecoveryService` shape, adapted to Barn's
//! actual trigger (heartbeat staleness, not wall-clock age since start) and
//! outcome (retry when the job's policy allows it, not unconditional
//! failure).

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use barn_core::{decide, Clock, ExitCode, JobState, RetryDecision, RetryHistoryEntry};
use barn_storage::{is_stale, JobRepository};

use crate::error::Result;
use crate::process;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub killed: usize,
    pub anomalies: usize,
}

/// Reconciles every RUNNING job against reality. A job is orphaned if its
/// pid is absent, its process is no longer alive, or its heartbeat is
/// stale -- any of those means no runner task survived the previous daemon
/// process. Idempotent: a second call after the first sees no RUNNING jobs
/// left to examine.
pub fn recover(repo: &JobRepository, clock: &dyn Clock, stale_heartbeat_threshold: Duration) -> Result<RecoveryReport> {
    let now = clock.now();
    let running = repo.find_by_state(JobState::Running)?;
    let mut report = RecoveryReport::default();

    for job in running {
        let orphaned = match job.pid {
            None => true,
            Some(pid) => {
                if !process::is_alive(pid) {
                    true
                } else if pid_was_reused(job.start_time_ticks, pid) {
                    // The live process at this pid is not the one Barn spawned --
                    // definitive orphan, no need to consult the heartbeat at all.
                    warn!(job_id = %job.id, pid, "pid reuse detected at startup, process start time no longer matches");
                    true
                } else if is_stale(job.heartbeat, stale_heartbeat_threshold, now) {
                    true
                } else {
                    // A live, recently-heartbeating RUNNING job at startup
                    // means something else is also running against this
                    // directory tree -- the scheduler lock should prevent
                    // this, so it's logged as an anomaly rather than acted on.
                    warn!(job_id = %job.id, pid, "found live RUNNING job at startup, leaving it alone");
                    report.anomalies += 1;
                    false
                }
            }
        };

        if !orphaned {
            continue;
        }

        if let Some(pid) = job.pid {
            process::kill_tree(pid, true);
        }

        let exit_code = ExitCode::Symbolic(ExitCode::ORPHANED_PROCESS.to_string());
        let decision = decide(&exit_code, job.retry_count, &job.job_config, now);
        match decision {
            RetryDecision::Retry { retry_at } => {
                let entry = RetryHistoryEntry {
                    attempt: job.retry_count + 1,
                    exit_code,
                    finished_at: now,
                    error: Some("daemon restarted while job was running".to_string()),
                };
                repo.requeue_for_retry(&job.id, JobState::Running, job.retry_count + 1, retry_at, entry)?;
                info!(job_id = %job.id, retry_at = %retry_at, "recovered orphaned job, requeued for retry");
                report.requeued += 1;
            }
            RetryDecision::Exhausted => {
                repo.mark_killed(&job.id, "killed by recovery: orphaned and no retries remain")?;
                info!(job_id = %job.id, "recovered orphaned job, no retries remain, marked killed");
                report.killed += 1;
            }
        }
    }

    Ok(report)
}

/// True only when a start time was recorded at spawn, a current start time
/// is readable, and the two disagree: definitive evidence the pid was
/// recycled. Any missing half of the comparison returns `false` (not
/// reused) and leaves the heartbeat check as the sole corroborating signal,
/// per spec 9's documented residual risk.
fn pid_was_reused(recorded: Option<u64>, pid: u32) -> bool {
    match (recorded, process::start_time_ticks(pid)) {
        (Some(recorded), Some(current)) => recorded != current,
        _ => false,
    }
}
