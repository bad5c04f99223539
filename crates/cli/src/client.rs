//! Daemon client (spec 4.18): one request/response round trip per CLI
//! invocation. Grounded in the teacher's `client.rs` (`DaemonClient`,
//! `connect`/`connect_or_start`, timeout env-var overrides), trimmed to
//! Barn's single-request-per-connection model — no persistent subscription,
//! no version-mismatch auto-restart (Barn's daemon and CLI ship together).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use barn_daemon::protocol::{self, ProtocolError, Request, Response};
use thiserror::Error;
use tokio::net::UnixStream;

fn env_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis)
}

pub fn timeout_ipc() -> Duration {
    env_duration_ms("BARN_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

pub fn timeout_connect() -> Duration {
    env_duration_ms("BARN_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

pub fn poll_interval() -> Duration {
    env_duration_ms("BARN_CONNECT_POLL_MS").unwrap_or(Duration::from_millis(50))
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("barn daemon is not running")]
    DaemonNotRunning,

    #[error("failed to start barn daemon: {0}")]
    DaemonStartFailed(String),

    #[error("timed out waiting for barn daemon to start")]
    DaemonStartTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon returned an error: {code:?}: {message}")]
    Rejected { code: protocol::ErrorCode, message: String },
}

pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Connects to an already-running daemon. Does not start one.
    pub fn connect(socket_path: PathBuf) -> Result<Self, ClientError> {
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }
        Ok(Self { socket_path })
    }

    /// Connects, auto-starting the daemon in the background if its socket
    /// doesn't exist yet, then polling until it accepts connections.
    pub async fn connect_or_start(socket_path: PathBuf, config_path: Option<&std::path::Path>) -> Result<Self, ClientError> {
        match Self::connect(socket_path.clone()) {
            Ok(client) => Ok(client),
            Err(ClientError::DaemonNotRunning) => {
                let child = crate::daemon_process::start_daemon_background(config_path)?;
                Self::connect_with_retry(socket_path, timeout_connect(), child).await
            }
            Err(e) => Err(e),
        }
    }

    async fn connect_with_retry(socket_path: PathBuf, timeout: Duration, mut child: std::process::Child) -> Result<Self, ClientError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ClientError::DaemonStartFailed(format!("daemon exited with {status}")));
            }
            if socket_path.exists() {
                if let Ok(client) = Self::connect(socket_path.clone()) {
                    if client.probe().await {
                        return Ok(client);
                    }
                }
            }
            tokio::time::sleep(poll_interval()).await;
        }
        Err(ClientError::DaemonStartTimeout)
    }

    /// True iff a connection attempt to the socket succeeds right now.
    pub async fn probe(&self) -> bool {
        UnixStream::connect(&self.socket_path).await.is_ok()
    }

    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|_| ClientError::DaemonNotRunning)?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = tokio::io::BufReader::new(reader);

        protocol::write_request(&mut writer, request, timeout_ipc()).await?;
        let response = protocol::read_response(&mut reader, timeout_ipc()).await?;
        Ok(response)
    }

    /// Sends a request and unwraps a successful payload, mapping an error
    /// response to [`ClientError::Rejected`].
    pub async fn send_ok(&self, request: &Request) -> Result<serde_json::Value, ClientError> {
        match self.send(request).await? {
            Response::Ok { payload } => Ok(payload),
            Response::Error { error } => Err(ClientError::Rejected { code: error.code, message: error.message }),
        }
    }
}
