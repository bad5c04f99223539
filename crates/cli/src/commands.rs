//! Subcommand implementations (spec 4.18, 6): each maps to exactly one IPC
//! request/response round trip. Connecting never auto-starts the daemon
//! except for `service start` itself -- an unreachable daemon for any other
//! subcommand is reported as exit code 2 (spec 6), not silently started.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use barn_daemon::protocol::{JobConfigOverride, Request};
use barn_daemon::Config;

use crate::client::{ClientError, DaemonClient};
use crate::output::{self, OutputFormat};

pub struct RunArgs {
    pub command: Vec<String>,
    pub tag: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub retry_backoff_multiplier: Option<f64>,
    pub retry_on_exit_codes: Option<Vec<i32>>,
}

pub async fn run(client: &DaemonClient, args: RunArgs, format: OutputFormat) -> Result<()> {
    if args.command.is_empty() {
        bail!("no command given, e.g. `barn run -- echo hello`");
    }
    let job_config = JobConfigOverride {
        timeout_seconds: args.timeout_seconds,
        max_retries: args.max_retries,
        retry_delay_seconds: args.retry_delay_seconds,
        retry_backoff_multiplier: args.retry_backoff_multiplier,
        retry_on_exit_codes: args.retry_on_exit_codes,
    };
    let request = Request::RunJob { command: args.command, tag: args.tag, job_config: Some(job_config) };
    let payload = client.send_ok(&request).await?;
    output::render_job(&payload, format);
    Ok(())
}

pub async fn status(client: &DaemonClient, tag: Option<String>, state: Option<String>, limit: Option<usize>, format: OutputFormat) -> Result<()> {
    let payload = client.send_ok(&Request::GetStatus { tag, state, limit }).await?;
    output::render_job_list(&payload, format);
    Ok(())
}

pub async fn show(client: &DaemonClient, id: String, format: OutputFormat) -> Result<()> {
    let payload = client.send_ok(&Request::GetJob { id }).await?;
    output::render_job(&payload, format);
    Ok(())
}

pub async fn kill(client: &DaemonClient, id: String, force: bool, format: OutputFormat) -> Result<()> {
    let payload = client.send_ok(&Request::KillJob { id, force }).await?;
    output::render_job(&payload, format);
    Ok(())
}

pub async fn clean(client: &DaemonClient, dry_run: bool, format: OutputFormat) -> Result<()> {
    let payload = client.send_ok(&Request::CleanJobs { dry_run }).await?;
    output::render_clean(&payload, format);
    Ok(())
}

pub async fn service_status(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let payload = client.send_ok(&Request::GetServiceStatus).await?;
    output::render_service_status(&payload, format);
    Ok(())
}

pub async fn service_reload(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let payload = client.send_ok(&Request::Reload).await?;
    output::render_reload(&payload, format);
    Ok(())
}

pub async fn service_stop(client: &DaemonClient) -> Result<()> {
    match client.send_ok(&Request::Shutdown).await {
        Ok(_) => {
            println!("barn daemon is shutting down");
            Ok(())
        }
        Err(ClientError::DaemonNotRunning) => {
            println!("barn daemon is not running");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn service_start(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let socket_path = config.ipc_socket_path();
    if let Ok(client) = DaemonClient::connect(socket_path.clone()) {
        if client.probe().await {
            println!("barn daemon is already running");
            return Ok(());
        }
    }

    let mut child = crate::daemon_process::start_daemon_background(config_path).context("failed to spawn barnd")?;
    let deadline = std::time::Instant::now() + crate::client::timeout_connect();
    while std::time::Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            bail!("barnd exited during startup with {status}");
        }
        if socket_path.exists() {
            if let Ok(client) = DaemonClient::connect(socket_path.clone()) {
                if client.probe().await {
                    println!("barn daemon started");
                    return Ok(());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bail!("timed out waiting for barn daemon to become ready")
}
