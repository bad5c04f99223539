//! Accept loop and request dispatch (spec 4.13), grounded in the teacher's
//! `listener/mod.rs` (`Listener::run` spawning one task per connection,
//! `ListenCtx` as the shared handler context). Barn's handler set is the
//! eight request types spec 4.13 names rather than the teacher's dozens of
//! entity-specific queries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use barn_core::{Clock, ExitCode, Job, JobConfig, JobId, JobState};
use barn_engine::{process, CleanupScheduler, Scheduler};
use barn_storage::{JobRepository, StorageError};

use crate::config::Config;
use crate::protocol::{self, ErrorCode, JobConfigOverride, Request, Response, DEFAULT_TIMEOUT};

/// Shared state every connection handler reads or mutates.
pub struct ListenCtx {
    pub repo: Arc<JobRepository>,
    pub scheduler: Arc<Scheduler>,
    pub cleanup: Arc<CleanupScheduler>,
    pub clock: Arc<dyn Clock>,
    /// Defaults applied to new submissions; updated in place by `reload`
    /// (spec 4.14) without requiring a restart.
    pub job_defaults: Mutex<JobConfig>,
    pub config_path: Option<PathBuf>,
    pub start_time: Instant,
    pub shutdown: Arc<Notify>,
}

pub struct Listener {
    socket: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Accepts connections until the process exits. Each connection runs on
    /// its own task so a slow or stuck client never blocks another (spec
    /// 4.13: "concurrent connections are served in parallel").
    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _addr)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &ctx).await {
                            match e {
                                protocol::ProtocolError::ConnectionClosed => debug!("client disconnected"),
                                protocol::ProtocolError::Timeout => warn!("connection timed out"),
                                other => warn!(error = %other, "connection error"),
                            }
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

/// Serves every request a client sends over one connection until it
/// disconnects (spec 4.13: "handles one or more newline-delimited textual
/// request messages"). The server never panics on malformed input: decode
/// errors are logged and the connection is closed, never propagated as a
/// crash.
async fn handle_connection(stream: UnixStream, ctx: &ListenCtx) -> Result<(), protocol::ProtocolError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(reader);

    loop {
        let request = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
            Ok(req) => req,
            Err(protocol::ProtocolError::ConnectionClosed) => return Ok(()),
            Err(protocol::ProtocolError::Json(e)) => {
                let response = Response::error(ErrorCode::InvalidRequest, format!("malformed request: {e}"));
                protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        debug!(request = ?request, "received request");
        let response = handle_request(request, ctx);
        protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;
    }
}

fn handle_request(request: Request, ctx: &ListenCtx) -> Response {
    match request {
        Request::RunJob { command, tag, job_config } => run_job(ctx, command, tag, job_config),
        Request::GetJob { id } => get_job(ctx, &id),
        Request::GetStatus { tag, state, limit } => get_status(ctx, tag, state, limit),
        Request::KillJob { id, force } => kill_job(ctx, &id, force),
        Request::CleanJobs { dry_run } => clean_jobs(ctx, dry_run),
        Request::GetServiceStatus => get_service_status(ctx),
        Request::Shutdown => {
            info!("shutdown requested over IPC");
            ctx.shutdown.notify_one();
            Response::ok(serde_json::json!({"message": "shutting down"}))
        }
        Request::Reload => reload(ctx),
    }
}

fn run_job(ctx: &ListenCtx, command: Vec<String>, tag: Option<String>, overrides: Option<JobConfigOverride>) -> Response {
    if command.is_empty() || command.iter().any(|a| a.is_empty()) {
        return Response::error(ErrorCode::InvalidRequest, "command must be a non-empty argv");
    }
    let config = apply_overrides(ctx.job_defaults.lock().clone(), overrides);
    match ctx.repo.create(command, tag, config) {
        Ok(job) => ok_job(&job),
        Err(e) => storage_error_response(e),
    }
}

fn apply_overrides(mut base: JobConfig, overrides: Option<JobConfigOverride>) -> JobConfig {
    let Some(o) = overrides else { return base };
    if let Some(v) = o.timeout_seconds {
        base.default_timeout_seconds = Some(v);
    }
    if let Some(v) = o.max_retries {
        base.max_retries = v;
    }
    if let Some(v) = o.retry_delay_seconds {
        base.retry_delay_seconds = v;
    }
    if let Some(v) = o.retry_backoff_multiplier {
        base.retry_backoff_multiplier = v;
    }
    if let Some(v) = o.retry_on_exit_codes {
        base.retry_on_exit_codes = v;
    }
    base
}

fn get_job(ctx: &ListenCtx, id: &str) -> Response {
    match ctx.repo.find_by_id(&JobId::new(id)) {
        Ok(Some(job)) => ok_job(&job),
        Ok(None) => Response::error(ErrorCode::JobNotFound, format!("no job with id {id}")),
        Err(e) => storage_error_response(e),
    }
}

fn get_status(ctx: &ListenCtx, tag: Option<String>, state: Option<String>, limit: Option<usize>) -> Response {
    let wanted_state = match state {
        Some(raw) => match JobState::parse(&raw) {
            Some(s) => Some(s),
            None => return Response::error(ErrorCode::InvalidRequest, format!("unknown state '{raw}'")),
        },
        None => None,
    };

    let mut jobs = match ctx.repo.find_all() {
        Ok(jobs) => jobs,
        Err(e) => return storage_error_response(e),
    };
    if let Some(s) = wanted_state {
        jobs.retain(|j| j.state == s);
    }
    if let Some(tag) = &tag {
        jobs.retain(|j| j.tag.as_deref() == Some(tag.as_str()));
    }
    // Most-recently-submitted first: the natural order for a status listing,
    // independent of the scheduler's FIFO dispatch order.
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if let Some(limit) = limit {
        jobs.truncate(limit);
    }

    let payload: Vec<serde_json::Value> = jobs.iter().map(job_json).collect();
    Response::ok(serde_json::json!({"jobs": payload}))
}

fn kill_job(ctx: &ListenCtx, id: &str, force: bool) -> Response {
    let job_id = JobId::new(id);
    let job = match ctx.repo.find_by_id(&job_id) {
        Ok(Some(job)) => job,
        Ok(None) => return Response::error(ErrorCode::JobNotFound, format!("no job with id {id}")),
        Err(e) => return storage_error_response(e),
    };

    if job.state != JobState::Running && job.state != JobState::Queued {
        return Response::error(
            ErrorCode::InvalidState,
            format!("job {id} is {} and cannot be killed", job.state),
        );
    }

    if job.state == JobState::Running {
        if let Some(pid) = job.pid {
            process::kill_tree(pid, force);
        }
    }

    match ctx.repo.mark_canceled(&job_id, Some("canceled via kill_job request".to_string())) {
        Ok(()) => ok_job(&ctx.repo.find_by_id(&job_id).ok().flatten().unwrap_or(job)),
        Err(e) => storage_error_response(e),
    }
}

fn clean_jobs(ctx: &ListenCtx, dry_run: bool) -> Response {
    let result = if dry_run { ctx.cleanup.candidates() } else { ctx.cleanup.sweep() };
    match result {
        Ok(ids) => {
            let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
            Response::ok(serde_json::json!({"dry_run": dry_run, "job_ids": ids, "count": ids.len()}))
        }
        Err(e) => storage_error_response(e),
    }
}

fn get_service_status(ctx: &ListenCtx) -> Response {
    let jobs = match ctx.repo.find_all() {
        Ok(jobs) => jobs,
        Err(e) => return storage_error_response(e),
    };
    let mut by_state = serde_json::Map::new();
    for state in [
        JobState::Queued,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Canceled,
        JobState::Killed,
    ] {
        let count = jobs.iter().filter(|j| j.state == state).count();
        by_state.insert(state.as_str().to_string(), serde_json::json!(count));
    }
    Response::ok(serde_json::json!({
        "pid": process::current_pid(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
        "jobs_by_state": by_state,
        "total_jobs": jobs.len(),
    }))
}

/// Re-reads the config file and applies the subset of settings that can
/// change without a restart (spec 4.14): the concurrency ceiling the
/// scheduler enforces, and the per-job defaults new submissions receive.
/// Everything else is reported back as requiring a restart rather than
/// silently ignored.
fn reload(ctx: &ListenCtx) -> Response {
    let config = match Config::load(ctx.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => return Response::error(ErrorCode::InternalError, format!("failed to reload config: {e}")),
    };

    ctx.scheduler.set_max_concurrent_jobs(config.max_concurrent_jobs);
    *ctx.job_defaults.lock() = config.default_job_config();

    let applied = vec!["max_concurrent_jobs", "retry_defaults_for_new_jobs"];
    let requires_restart = vec![
        "base_dir",
        "ipc_socket",
        "log_level",
        "stale_heartbeat_threshold_seconds",
        "poll_interval_seconds",
        "cleanup.cleanup_interval_minutes",
    ];
    info!("configuration reloaded");
    Response::ok(serde_json::json!({
        "applied": applied,
        "requires_restart": requires_restart,
    }))
}

fn ok_job(job: &Job) -> Response {
    Response::ok(job_json(job))
}

fn job_json(job: &Job) -> serde_json::Value {
    serde_json::to_value(job).unwrap_or(serde_json::Value::Null)
}

fn storage_error_response(e: StorageError) -> Response {
    match e {
        StorageError::NotFound(id) => Response::error(ErrorCode::JobNotFound, format!("no job with id {id}")),
        StorageError::InvalidTransition { id, from, to } => Response::error(
            ErrorCode::InvalidState,
            format!("job {id} cannot move from {from} to {to}"),
        ),
        other => {
            warn!(error = %other, "storage error handling request");
            Response::error(ErrorCode::InternalError, other.to_string())
        }
    }
}

/// Recovery's stale-heartbeat threshold, shared with the scheduler's
/// heartbeat interval derivation (spec 4.8: ~1/3 of the stale threshold).
pub fn heartbeat_interval_from_threshold(stale_threshold: ChronoDuration) -> std::time::Duration {
    let seconds = (stale_threshold.num_seconds() / 3).max(1);
    std::time::Duration::from_secs(seconds as u64)
}
