//! `barn` - CLI for the Barn job-supervisor daemon (spec 4.18, 6).

mod client;
mod commands;
mod daemon_process;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use barn_daemon::protocol::ErrorCode;
use barn_daemon::Config;
use client::{ClientError, DaemonClient};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "barn", version, about = "Submit and supervise background jobs")]
struct Cli {
    /// Path to barn.toml (default: $BARN_CONFIG)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a command to run
    Run {
        /// Tag to attach to the job, filterable via `status --tag`
        #[arg(long)]
        tag: Option<String>,
        /// Per-job timeout override
        #[arg(long)]
        timeout: Option<u64>,
        /// Per-job max-retries override
        #[arg(long = "max-retries")]
        max_retries: Option<u32>,
        /// Per-job retry delay override, in seconds
        #[arg(long = "retry-delay")]
        retry_delay: Option<u64>,
        /// Per-job retry backoff multiplier override
        #[arg(long = "retry-backoff")]
        retry_backoff: Option<f64>,
        /// Comma-separated exit codes that trigger a retry (empty default means any nonzero)
        #[arg(long = "retry-on", value_delimiter = ',')]
        retry_on: Option<Vec<i32>>,
        /// The command and its arguments, e.g. `barn run -- echo hello`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// List jobs, optionally filtered
    Status {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one job's full detail
    Show { id: String },
    /// Kill a queued or running job
    Kill {
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// Delete terminal jobs past their retention window
    Clean {
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Manage the barn daemon itself
    #[command(subcommand)]
    Service(ServiceCommand),
}

#[derive(Subcommand)]
enum ServiceCommand {
    /// Start the daemon if it isn't already running
    Start,
    /// Request a graceful daemon shutdown
    Stop,
    /// Daemon uptime, version, and per-state job counts
    Status,
    /// Re-read configuration and apply the settings that don't require a restart
    Reload,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.output;

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, &config, cli.config.as_deref(), format).await {
        eprintln!("Error: {e}");
        std::process::exit(exit_code_for(&e));
    }
}

async fn run(command: Commands, config: &Config, config_path: Option<&std::path::Path>, format: OutputFormat) -> anyhow::Result<()> {
    if let Commands::Service(ServiceCommand::Start) = command {
        return commands::service_start(config, config_path).await;
    }

    let client = DaemonClient::new(config.ipc_socket_path());
    match command {
        Commands::Run { tag, timeout, max_retries, retry_delay, retry_backoff, retry_on, command } => {
            let args = commands::RunArgs {
                command,
                tag,
                timeout_seconds: timeout,
                max_retries,
                retry_delay_seconds: retry_delay,
                retry_backoff_multiplier: retry_backoff,
                retry_on_exit_codes: retry_on,
            };
            commands::run(&client, args, format).await
        }
        Commands::Status { tag, state, limit } => commands::status(&client, tag, state, limit, format).await,
        Commands::Show { id } => commands::show(&client, id, format).await,
        Commands::Kill { id, force } => commands::kill(&client, id, force, format).await,
        Commands::Clean { dry_run } => commands::clean(&client, dry_run, format).await,
        Commands::Service(ServiceCommand::Start) => unreachable!("handled above"),
        Commands::Service(ServiceCommand::Stop) => commands::service_stop(&client).await,
        Commands::Service(ServiceCommand::Status) => commands::service_status(&client, format).await,
        Commands::Service(ServiceCommand::Reload) => commands::service_reload(&client, format).await,
    }
}

/// Maps a failure to one of spec 6's exit codes: 1 user error, 2 service
/// unreachable, 3 operation-specific failure. Anything not a [`ClientError`]
/// (argument validation, config errors) falls back to 1.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ClientError>() {
        Some(ClientError::DaemonNotRunning) | Some(ClientError::DaemonStartFailed(_)) | Some(ClientError::DaemonStartTimeout) => 2,
        Some(ClientError::Io(_)) | Some(ClientError::Protocol(_)) => 2,
        Some(ClientError::Rejected { code, .. }) => match code {
            ErrorCode::JobNotFound | ErrorCode::InvalidRequest => 1,
            ErrorCode::InvalidState | ErrorCode::InternalError => 3,
        },
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_not_running_maps_to_service_unreachable() {
        let err = anyhow::Error::new(ClientError::DaemonNotRunning);
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn job_not_found_maps_to_user_error() {
        let err = anyhow::Error::new(ClientError::Rejected { code: ErrorCode::JobNotFound, message: "no such job".into() });
        assert_eq!(exit_code_for(&err), 1);
    }

    #[test]
    fn invalid_state_maps_to_operation_failure() {
        let err = anyhow::Error::new(ClientError::Rejected { code: ErrorCode::InvalidState, message: "already terminal".into() });
        assert_eq!(exit_code_for(&err), 3);
    }

    #[test]
    fn plain_anyhow_error_falls_back_to_user_error() {
        let err = anyhow::anyhow!("bad flag combination");
        assert_eq!(exit_code_for(&err), 1);
    }
}
