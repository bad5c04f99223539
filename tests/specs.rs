//! Black-box behavioral specifications for the `barn`/`barnd` pair.
//!
//! Each test spins up a real `barnd` against an isolated base directory,
//! drives it with real `barn` subprocess invocations, and asserts on exit
//! codes and IPC-derived output. Grounded in the teacher's
//! `tests/specs/prelude.rs` (`CliBuilder`/`wait_for` polling DSL) and
//! `tests/specs/daemon/*.rs` scenario shapes, adapted to spec 8's
//! end-to-end scenarios and ambient-stack checks.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output};
use std::time::{Duration, Instant};

use serde_json::Value;

const POLL_INTERVAL_MS: u64 = 20;
const WAIT_MAX_MS: u64 = 5000;

fn binary_path(name: &str) -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let standard = manifest_dir.join("target/debug").join(name);
    if standard.exists() {
        return standard;
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(debug_dir) = exe.parent().and_then(|d| d.parent()) {
            let fallback = debug_dir.join(name);
            if fallback.exists() {
                return fallback;
            }
        }
    }
    standard
}

fn barn_binary() -> PathBuf {
    binary_path("barn")
}

fn barnd_binary() -> PathBuf {
    binary_path("barnd")
}

/// Polls `condition` until it returns true or `WAIT_MAX_MS` elapses.
fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(WAIT_MAX_MS) {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }
    false
}

/// An isolated daemon + base directory for one test. Writes its own
/// `barn.toml`, starts `barnd` directly (bypassing `barn service start` so
/// tests don't depend on CLI auto-start behavior), and kills it on drop.
struct Harness {
    _dir: tempfile::TempDir,
    config_path: PathBuf,
    base_dir: PathBuf,
    daemon: Option<Child>,
}

impl Harness {
    /// Writes a `barn.toml` with `extra_toml` appended, but does not start
    /// the daemon yet.
    fn new(extra_toml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base_dir = dir.path().join("state");
        let config_path = dir.path().join("barn.toml");
        std::fs::write(&config_path, format!("base_dir = {:?}\n{extra_toml}", base_dir.to_string_lossy())).unwrap();
        Self { _dir: dir, config_path, base_dir, daemon: None }
    }

    fn socket_path(&self) -> PathBuf {
        self.base_dir.join("barn.sock")
    }

    /// Spawns `barnd` and waits for its socket to accept connections.
    fn start(&mut self) {
        let child = Command::new(barnd_binary())
            .arg("--config")
            .arg(&self.config_path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .expect("barnd should spawn");
        self.daemon = Some(child);

        let socket = self.socket_path();
        let ready = wait_for(|| socket.exists());
        assert!(ready, "daemon never created its socket at {}", socket.display());
    }

    fn barn(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(barn_binary());
        cmd.arg("--config").arg(&self.config_path);
        cmd.args(args);
        cmd
    }

    fn run_ok(&self, args: &[&str]) -> Output {
        let output = self.barn(args).output().expect("barn should run");
        assert!(
            output.status.success(),
            "expected `barn {}` to succeed, got {:?}\nstdout: {}\nstderr: {}",
            args.join(" "),
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        output
    }

    fn run_json(&self, args: &[&str]) -> Value {
        let mut full_args = vec!["-o", "json"];
        full_args.extend_from_slice(args);
        let output = self.run_ok(&full_args);
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
    }

    /// Polls `barn status` until a job in the given state appears, returning
    /// its JSON object.
    fn wait_for_job_state(&self, id: &str, state: &str) -> Value {
        let mut last = Value::Null;
        let found = wait_for(|| {
            last = self.run_json(&["show", id]);
            last.get("state").and_then(Value::as_str) == Some(state)
        });
        assert!(found, "job {id} never reached {state}, last seen: {last}");
        last
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(child) = &mut self.daemon {
            if let Ok(None) = child.try_wait() {
                let _ = self.barn(&["service", "stop"]).output();
                let deadline = Instant::now() + Duration::from_secs(2);
                while Instant::now() < deadline {
                    if let Ok(Some(_)) = child.try_wait() {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

fn job_id(payload: &Value) -> String {
    payload.get("id").and_then(Value::as_str).expect("job payload should have an id").to_string()
}

// =============================================================================
// End-to-end scenarios (spec 8)
// =============================================================================

#[test]
fn happy_path_job_runs_to_completion() {
    let mut harness = Harness::new("poll_interval_seconds = 1\n");
    harness.start();

    let submitted = harness.run_json(&["run", "--", "echo", "hello"]);
    let id = job_id(&submitted);

    let finished = harness.wait_for_job_state(&id, "succeeded");
    assert_eq!(finished.get("exit_code").and_then(Value::as_i64), Some(0));

    let stdout_log = harness.base_dir.join("jobs").join(&id).join("logs").join("stdout.log");
    let contents = std::fs::read_to_string(&stdout_log).unwrap_or_default();
    assert!(contents.contains("hello"), "stdout.log was: {contents:?}");
}

#[test]
fn retry_on_failure_exhausts_retries_and_fails() {
    let mut harness = Harness::new("poll_interval_seconds = 1\n");
    harness.start();

    let submitted = harness.run_json(&[
        "run",
        "--max-retries",
        "2",
        "--retry-delay",
        "1",
        "--retry-backoff",
        "2",
        "--",
        "sh",
        "-c",
        "exit 1",
    ]);
    let id = job_id(&submitted);

    let finished = harness.wait_for_job_state(&id, "failed");
    assert_eq!(finished.get("retry_count").and_then(Value::as_u64), Some(2));
}

#[test]
fn kill_running_job_transitions_to_canceled() {
    let mut harness = Harness::new("poll_interval_seconds = 1\n");
    harness.start();

    let submitted = harness.run_json(&["run", "--", "sleep", "60"]);
    let id = job_id(&submitted);
    harness.wait_for_job_state(&id, "running");

    harness.run_ok(&["kill", &id]);
    let canceled = harness.wait_for_job_state(&id, "canceled");
    assert!(canceled.get("retry_count").and_then(Value::as_u64).unwrap_or(0) == 0);
}

#[test]
fn concurrency_cap_limits_simultaneous_running_jobs() {
    let mut harness = Harness::new("poll_interval_seconds = 1\nmax_concurrent_jobs = 2\n");
    harness.start();

    let ids: Vec<String> = (0..5)
        .map(|_| job_id(&harness.run_json(&["run", "--", "sleep", "2"])))
        .collect();

    // Sample concurrently-running count a few times while jobs are in flight.
    let mut max_seen = 0usize;
    let deadline = Instant::now() + Duration::from_secs(8);
    while Instant::now() < deadline {
        let status = harness.run_json(&["status"]);
        let running = status
            .get("jobs")
            .and_then(Value::as_array)
            .map(|jobs| jobs.iter().filter(|j| j.get("state").and_then(Value::as_str) == Some("running")).count())
            .unwrap_or(0);
        max_seen = max_seen.max(running);
        if ids.iter().all(|id| {
            let job = harness.run_json(&["show", id]);
            job.get("state").and_then(Value::as_str) == Some("succeeded")
        }) {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    assert!(max_seen <= 2, "observed {max_seen} jobs RUNNING simultaneously, cap was 2");
    for id in &ids {
        harness.wait_for_job_state(id, "succeeded");
    }
}

// =============================================================================
// Ambient-stack checks
// =============================================================================

#[test]
fn invalid_config_is_rejected_before_any_directory_is_touched() {
    let dir = tempfile::tempdir().unwrap();
    let base_dir = dir.path().join("state");
    let config_path = dir.path().join("barn.toml");
    std::fs::write(&config_path, format!("base_dir = {:?}\nmax_concurrent_jobs = 0\n", base_dir.to_string_lossy())).unwrap();

    let output = Command::new(barnd_binary()).arg("--config").arg(&config_path).output().expect("barnd should run");

    assert!(!output.status.success());
    assert!(!base_dir.exists(), "base_dir should never be created when config validation fails");
}

#[test]
fn status_text_output_is_exact_when_no_jobs_exist() {
    let mut harness = Harness::new("poll_interval_seconds = 1\n");
    harness.start();

    let output = harness.run_ok(&["status"]);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    similar_asserts::assert_eq!(stdout, "no jobs\n");
}

#[test]
fn second_instance_against_same_base_dir_fails_fast() {
    let mut harness = Harness::new("poll_interval_seconds = 1\n");
    harness.start();

    let second = Command::new(barnd_binary())
        .arg("--config")
        .arg(&harness.config_path)
        .output()
        .expect("second barnd should run to completion");

    assert_eq!(second.status.code(), Some(2));
}

#[test]
fn cli_exit_codes_cover_the_spec_6_table() {
    let mut harness = Harness::new("poll_interval_seconds = 1\n");

    // Exit code 2: daemon unreachable before it's started.
    let unreachable = harness.barn(&["status"]).output().expect("barn should run");
    assert_eq!(unreachable.status.code(), Some(2));

    harness.start();

    // Exit code 0: happy path.
    let ok = harness.barn(&["status"]).output().expect("barn should run");
    assert_eq!(ok.status.code(), Some(0));

    // Exit code 1: job not found (user error).
    let not_found = harness.barn(&["show", "does-not-exist"]).output().expect("barn should run");
    assert_eq!(not_found.status.code(), Some(1));

    // Exit code 3: operation-specific failure (killing an already-terminal job).
    let submitted = harness.run_json(&["run", "--", "echo", "hi"]);
    let id = job_id(&submitted);
    harness.wait_for_job_state(&id, "succeeded");
    let invalid_state = harness.barn(&["kill", &id]).output().expect("barn should run");
    assert_eq!(invalid_state.status.code(), Some(3));
}

#[test]
fn malformed_ipc_line_yields_invalid_request_without_killing_the_connection() {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    let mut harness = Harness::new("poll_interval_seconds = 1\n");
    harness.start();

    let mut stream = UnixStream::connect(harness.socket_path()).expect("should connect to daemon socket");
    writeln!(stream, "{{not valid json").expect("write should succeed");
    stream.flush().unwrap();

    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).expect("daemon should reply, not hang up");
    let response: Value = serde_json::from_str(&line).expect("response should be JSON");
    assert_eq!(response.get("status").and_then(Value::as_str), Some("error"));
    assert_eq!(
        response.get("error").and_then(|e| e.get("code")).and_then(Value::as_str),
        Some("INVALID_REQUEST")
    );

    // The connection, and the daemon, are still alive: a well-formed request
    // on the same socket (a fresh connection, since the server closes each
    // one after one request/response) still succeeds.
    drop(reader);
    let status = harness.run_ok(&["status"]);
    assert!(status.status.success());
}
