//! Wire protocol for barn's local socket (spec 4.13, 6): newline-delimited
//! UTF-8 JSON request/response frames, one request per line. Adapted from
//! the teacher's `protocol_wire.rs` length-prefixed binary framing -- Barn's
//! spec calls for a human-inspectable text protocol instead (`nc`/`jq`
//! friendly), so the length prefix is replaced with a newline terminator and
//! a line-length cap takes over the role the teacher's `MessageTooLarge`
//! check played.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

/// Maximum single-line request/response size. Generous for a command-line
/// job's argv and output metadata, small enough to bound one misbehaving
/// client's memory footprint.
pub const MAX_LINE_SIZE: usize = 8 * 1024 * 1024;

/// Default IPC timeout for one request/response round trip.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request line too large: {size} bytes (max {max})")]
    LineTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout waiting for peer")]
    Timeout,
}

/// A submission override for one job's retry/timeout policy. Every field is
/// optional; unset fields fall back to the daemon's configured defaults
/// (spec 6, `job_config`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfigOverride {
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<u64>,
    #[serde(default)]
    pub retry_backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub retry_on_exit_codes: Option<Vec<i32>>,
}

/// One request frame. `#[serde(tag = "type", content = "payload")]` produces
/// exactly the `{"type": ..., "payload": ...}` envelope spec 4.13 specifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Request {
    RunJob {
        command: Vec<String>,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        job_config: Option<JobConfigOverride>,
    },
    GetJob {
        id: String,
    },
    GetStatus {
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        state: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    KillJob {
        id: String,
        #[serde(default)]
        force: bool,
    },
    CleanJobs {
        #[serde(default)]
        dry_run: bool,
    },
    GetServiceStatus,
    Shutdown,
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    JobNotFound,
    InvalidState,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// One response frame (spec 4.13). `status` doubles as the serde tag, so
/// `Ok`'s companion field is `payload` and `Error`'s is `error`, matching
/// the schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok { payload: serde_json::Value },
    Error { error: ErrorBody },
}

impl Response {
    pub fn ok(payload: serde_json::Value) -> Self {
        Response::Ok { payload }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

/// Reads one newline-delimited JSON frame, with a timeout and a size cap so
/// a slow-loris or runaway client can't wedge a connection-handling task
/// forever or grow its buffer unbounded.
pub async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    timeout: std::time::Duration,
) -> Result<String, ProtocolError> {
    let mut line = String::new();
    let n = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if line.len() > MAX_LINE_SIZE {
        return Err(ProtocolError::LineTooLarge {
            size: line.len(),
            max: MAX_LINE_SIZE,
        });
    }
    Ok(line)
}

pub async fn read_request<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    timeout: std::time::Duration,
) -> Result<Request, ProtocolError> {
    let line = read_line(reader, timeout).await?;
    Ok(serde_json::from_str(line.trim_end())?)
}

pub async fn write_response<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: std::time::Duration,
) -> Result<(), ProtocolError> {
    write_line(writer, response, timeout).await
}

/// Client-side counterpart of [`write_response`]: sends one request frame.
pub async fn write_request<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    request: &Request,
    timeout: std::time::Duration,
) -> Result<(), ProtocolError> {
    write_line(writer, request, timeout).await
}

/// Client-side counterpart of [`read_request`]: reads one response frame.
pub async fn read_response<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    timeout: std::time::Duration,
) -> Result<Response, ProtocolError> {
    let line = read_line(reader, timeout).await?;
    Ok(serde_json::from_str(line.trim_end())?)
}

async fn write_line<W: tokio::io::AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
    timeout: std::time::Duration,
) -> Result<(), ProtocolError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    tokio::time::timeout(timeout, async {
        writer.write_all(&bytes).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| ProtocolError::Timeout)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_job_request_matches_wire_schema() {
        let req = Request::RunJob {
            command: vec!["echo".into(), "hi".into()],
            tag: Some("nightly".into()),
            job_config: None,
        };
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(json["type"], "run_job");
        assert_eq!(json["payload"]["command"][0], "echo");
    }

    #[test]
    fn no_payload_requests_still_roundtrip() {
        for req in [Request::GetServiceStatus, Request::Shutdown, Request::Reload] {
            let encoded = serde_json::to_string(&req).unwrap();
            let decoded: Request = serde_json::from_str(&encoded).unwrap();
            assert_eq!(format!("{decoded:?}"), format!("{req:?}"));
        }
    }

    #[test]
    fn ok_response_matches_wire_schema() {
        let resp = Response::ok(serde_json::json!({"id": "job-1"}));
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["payload"]["id"], "job-1");
    }

    #[test]
    fn error_response_matches_wire_schema() {
        let resp = Response::error(ErrorCode::JobNotFound, "no such job");
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["code"], "JOB_NOT_FOUND");
        assert_eq!(json["error"]["message"], "no such job");
    }

    #[tokio::test]
    async fn read_line_reports_clean_disconnect() {
        let mut reader = tokio::io::BufReader::new(&b""[..]);
        let err = read_line(&mut reader, std::time::Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn read_request_decodes_a_single_line() {
        let input = b"{\"type\":\"get_service_status\"}\n".to_vec();
        let mut reader = tokio::io::BufReader::new(&input[..]);
        let req = read_request(&mut reader, std::time::Duration::from_secs(1)).await.unwrap();
        assert!(matches!(req, Request::GetServiceStatus));
    }

    #[tokio::test]
    async fn client_side_write_request_read_response_round_trip() {
        let mut buf = Vec::new();
        write_request(&mut buf, &Request::GetServiceStatus, std::time::Duration::from_secs(1))
            .await
            .unwrap();
        let mut reader = tokio::io::BufReader::new(&buf[..]);
        let decoded = read_request(&mut reader, std::time::Duration::from_secs(1)).await.unwrap();
        assert!(matches!(decoded, Request::GetServiceStatus));

        let mut buf = Vec::new();
        write_line(&mut buf, &Response::ok(serde_json::json!({"a": 1})), std::time::Duration::from_secs(1))
            .await
            .unwrap();
        let mut reader = tokio::io::BufReader::new(&buf[..]);
        let decoded = read_response(&mut reader, std::time::Duration::from_secs(1)).await.unwrap();
        assert!(matches!(decoded, Response::Ok { .. }));
    }
}
