//! Barn daemon (`barnd`): background process that owns the job repository,
//! dispatch loop, and IPC server. Grounded in the teacher's `main.rs`
//! (pre-lock flag handling, READY marker, signal handlers, main select
//! loop, reverse shutdown sequence).

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use barn_daemon::config::Config;
use barn_daemon::lifecycle::{self, LifecycleError, StartupResult};
use barn_daemon::listener::Listener;
use barn_daemon::logging;

/// How long shutdown waits for in-flight jobs to finish naturally before
/// force-killing them (spec 4.14's shutdown "explicit waits").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn print_help() {
    println!("barnd {}", env!("CARGO_PKG_VERSION"));
    println!("Barn job-supervisor daemon");
    println!();
    println!("USAGE:");
    println!("    barnd [--config <path>]");
    println!();
    println!("barnd is typically started by `barn service start` and should not");
    println!("be invoked directly. It listens on a local socket for commands");
    println!("from the `barn` CLI.");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <path>   Path to barn.toml (default: $BARN_CONFIG)");
    println!("    -h, --help            Print help information");
    println!("    -V, --version         Print version information");
}

/// Parses the handful of flags `barnd` accepts itself, before any config or
/// lock acquisition happens (spec 4.18 leaves daemon invocation unspecified
/// beyond "started by the CLI"; this mirrors the teacher's pre-lock flag
/// handling for `--help`/`--version`).
fn parse_args() -> Result<Option<PathBuf>, ()> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("barnd {}", env!("CARGO_PKG_VERSION"));
                return Err(());
            }
            "--help" | "-h" => {
                print_help();
                return Err(());
            }
            "--config" | "-c" => {
                let Some(path) = args.next() else {
                    eprintln!("error: --config requires a path argument");
                    std::process::exit(1);
                };
                config_path = Some(PathBuf::from(path));
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("usage: barnd [--config <path>]");
                std::process::exit(1);
            }
        }
    }
    Ok(config_path)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match parse_args() {
        Ok(path) => path,
        Err(()) => return Ok(()),
    };

    let config = Config::load(config_path.as_deref())?;
    let log_path = config.base_dir.join("logs").join("barn.log");

    logging::rotate_log_if_needed(&log_path);
    let log_guard = logging::setup_logging(&log_path, &config.log_level)?;

    info!("starting barn daemon");

    let StartupResult { daemon, listener_socket } = match lifecycle::startup(config, config_path).await {
        Ok(result) => result,
        Err(LifecycleError::AlreadyRunning) => {
            eprintln!("barnd is already running against this base directory");
            drop(log_guard);
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "failed to start daemon");
            drop(log_guard);
            return Err(e.into());
        }
    };

    let listener = Listener::new(listener_socket, daemon.listen_ctx.clone());
    tokio::spawn(listener.run());

    let scheduler_task = tokio::spawn(daemon.scheduler.clone().run());
    let cleanup_task = daemon.cleanup_enabled.then(|| tokio::spawn(daemon.cleanup.clone().run()));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(socket = %daemon.config.ipc_socket_path().display(), "daemon ready");
    println!("READY");

    tokio::select! {
        _ = daemon.shutdown.notified() => info!("shutdown requested over IPC"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    daemon.stop(SHUTDOWN_GRACE, true).await;
    scheduler_task.abort();
    if let Some(task) = cleanup_task {
        task.abort();
    }

    let socket_path = daemon.config.ipc_socket_path();
    let _ = std::fs::remove_file(&socket_path);

    info!("daemon stopped");
    Ok(())
}
