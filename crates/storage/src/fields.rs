//! Typed read/write accessors over the atomic layer (spec 4.2). Each `Job`
//! attribute maps to exactly one file under `jobs/<id>/`. Timestamps
//! serialize as ISO-8601 UTC; `state` serializes lowercase; `exit_code` has
//! two readers (integer-valued, always-string-valued).

use chrono::{DateTime, Utc};

use crate::atomic::{delete_if_present, read_or_none, write_atomic_str};
use crate::error::{Result, StorageError};
use crate::layout::DirLayout;
use barn_core::{ExitCode, Job, JobConfig, JobId, JobState, RetryHistoryEntry};

fn field_path(layout: &DirLayout, id: &JobId, name: &str) -> std::path::PathBuf {
    layout.job_field_path(id, name)
}

pub fn write_state(layout: &DirLayout, id: &JobId, state: JobState) -> Result<()> {
    write_atomic_str(&field_path(layout, id, "state"), state.as_str())
}

/// Returns `None` for a missing file and for any value outside the six
/// known literals -- callers treat both as "do not guess, log and skip".
pub fn read_state(layout: &DirLayout, id: &JobId) -> Result<Option<JobState>> {
    match read_or_none(&field_path(layout, id, "state"))? {
        Some(raw) => Ok(JobState::parse(&raw)),
        None => Ok(None),
    }
}

pub fn write_command(layout: &DirLayout, id: &JobId, command: &[String]) -> Result<()> {
    let path = field_path(layout, id, "command");
    let json = serde_json::to_string(command).map_err(|e| StorageError::json(path.clone(), e))?;
    write_atomic_str(&path, &json)
}

pub fn read_command(layout: &DirLayout, id: &JobId) -> Result<Option<Vec<String>>> {
    let path = field_path(layout, id, "command");
    match read_or_none(&path)? {
        Some(raw) => {
            let command: Vec<String> =
                serde_json::from_str(&raw).map_err(|e| StorageError::json(path, e))?;
            Ok(Some(command))
        }
        None => Ok(None),
    }
}

pub fn write_tag(layout: &DirLayout, id: &JobId, tag: Option<&str>) -> Result<()> {
    match tag {
        Some(tag) => write_atomic_str(&field_path(layout, id, "tag"), tag),
        None => delete_if_present(&field_path(layout, id, "tag")),
    }
}

pub fn read_tag(layout: &DirLayout, id: &JobId) -> Result<Option<String>> {
    read_or_none(&field_path(layout, id, "tag"))
}

fn write_timestamp(layout: &DirLayout, id: &JobId, name: &str, ts: DateTime<Utc>) -> Result<()> {
    write_atomic_str(&field_path(layout, id, name), &ts.to_rfc3339())
}

fn read_timestamp(layout: &DirLayout, id: &JobId, name: &str) -> Result<Option<DateTime<Utc>>> {
    let path = field_path(layout, id, name);
    match read_or_none(&path)? {
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| StorageError::Corrupt {
                    id: id.to_string(),
                    detail: format!("{name}: {e}"),
                })?
                .with_timezone(&Utc);
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub fn write_created_at(layout: &DirLayout, id: &JobId, ts: DateTime<Utc>) -> Result<()> {
    write_timestamp(layout, id, "created_at", ts)
}
pub fn read_created_at(layout: &DirLayout, id: &JobId) -> Result<Option<DateTime<Utc>>> {
    read_timestamp(layout, id, "created_at")
}

pub fn write_started_at(layout: &DirLayout, id: &JobId, ts: DateTime<Utc>) -> Result<()> {
    write_timestamp(layout, id, "started_at", ts)
}
pub fn read_started_at(layout: &DirLayout, id: &JobId) -> Result<Option<DateTime<Utc>>> {
    read_timestamp(layout, id, "started_at")
}

pub fn write_finished_at(layout: &DirLayout, id: &JobId, ts: DateTime<Utc>) -> Result<()> {
    write_timestamp(layout, id, "finished_at", ts)
}
pub fn read_finished_at(layout: &DirLayout, id: &JobId) -> Result<Option<DateTime<Utc>>> {
    read_timestamp(layout, id, "finished_at")
}

pub fn write_heartbeat(layout: &DirLayout, id: &JobId, ts: DateTime<Utc>) -> Result<()> {
    write_timestamp(layout, id, "heartbeat", ts)
}
pub fn read_heartbeat(layout: &DirLayout, id: &JobId) -> Result<Option<DateTime<Utc>>> {
    read_timestamp(layout, id, "heartbeat")
}

pub fn write_retry_at(layout: &DirLayout, id: &JobId, ts: Option<DateTime<Utc>>) -> Result<()> {
    match ts {
        Some(ts) => write_timestamp(layout, id, "retry_at", ts),
        None => delete_if_present(&field_path(layout, id, "retry_at")),
    }
}
pub fn read_retry_at(layout: &DirLayout, id: &JobId) -> Result<Option<DateTime<Utc>>> {
    read_timestamp(layout, id, "retry_at")
}

pub fn write_exit_code(layout: &DirLayout, id: &JobId, code: &ExitCode) -> Result<()> {
    write_atomic_str(&field_path(layout, id, "exit_code"), &code.as_display_str())
}

/// Integer-valued reader: `None` on a symbolic exit code or absent file.
pub fn read_exit_code_numeric(layout: &DirLayout, id: &JobId) -> Result<Option<i32>> {
    Ok(read_exit_code(layout, id)?.and_then(|c| c.as_numeric()))
}

/// Always-available reader: numeric or symbolic, `None` only if absent.
pub fn read_exit_code(layout: &DirLayout, id: &JobId) -> Result<Option<ExitCode>> {
    Ok(read_or_none(&field_path(layout, id, "exit_code"))?.map(|raw| ExitCode::parse(&raw)))
}

pub fn write_error(layout: &DirLayout, id: &JobId, error: Option<&str>) -> Result<()> {
    match error {
        Some(error) => write_atomic_str(&field_path(layout, id, "error"), error),
        None => delete_if_present(&field_path(layout, id, "error")),
    }
}

pub fn read_error(layout: &DirLayout, id: &JobId) -> Result<Option<String>> {
    read_or_none(&field_path(layout, id, "error"))
}

pub fn write_pid(layout: &DirLayout, id: &JobId, pid: u32) -> Result<()> {
    write_atomic_str(&field_path(layout, id, "pid"), &pid.to_string())
}

pub fn read_pid(layout: &DirLayout, id: &JobId) -> Result<Option<u32>> {
    let path = field_path(layout, id, "pid");
    match read_or_none(&path)? {
        Some(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                id: id.to_string(),
                detail: format!("pid: {e}"),
            }),
        None => Ok(None),
    }
}

pub fn write_start_time_ticks(layout: &DirLayout, id: &JobId, ticks: Option<u64>) -> Result<()> {
    match ticks {
        Some(ticks) => write_atomic_str(&field_path(layout, id, "start_time_ticks"), &ticks.to_string()),
        None => delete_if_present(&field_path(layout, id, "start_time_ticks")),
    }
}

pub fn read_start_time_ticks(layout: &DirLayout, id: &JobId) -> Result<Option<u64>> {
    let path = field_path(layout, id, "start_time_ticks");
    match read_or_none(&path)? {
        Some(raw) => raw.parse::<u64>().map(Some).map_err(|e| StorageError::Corrupt {
            id: id.to_string(),
            detail: format!("start_time_ticks: {e}"),
        }),
        None => Ok(None),
    }
}

pub fn write_retry_count(layout: &DirLayout, id: &JobId, count: u32) -> Result<()> {
    write_atomic_str(&field_path(layout, id, "retry_count"), &count.to_string())
}

pub fn read_retry_count(layout: &DirLayout, id: &JobId) -> Result<u32> {
    let path = field_path(layout, id, "retry_count");
    match read_or_none(&path)? {
        Some(raw) => raw.parse::<u32>().map_err(|e| StorageError::Corrupt {
            id: id.to_string(),
            detail: format!("retry_count: {e}"),
        }),
        None => Ok(0),
    }
}

pub fn write_job_config(layout: &DirLayout, id: &JobId, config: &JobConfig) -> Result<()> {
    let path = field_path(layout, id, "job_config");
    let json = serde_json::to_string(config).map_err(|e| StorageError::json(path.clone(), e))?;
    write_atomic_str(&path, &json)
}

pub fn read_job_config(layout: &DirLayout, id: &JobId) -> Result<Option<JobConfig>> {
    let path = field_path(layout, id, "job_config");
    match read_or_none(&path)? {
        Some(raw) => {
            let config = serde_json::from_str(&raw).map_err(|e| StorageError::json(path, e))?;
            Ok(Some(config))
        }
        None => Ok(None),
    }
}

/// Appends one entry to the newline-separated retry history by reading the
/// current content, adding the new line, and rewriting atomically.
pub fn append_retry_history(layout: &DirLayout, id: &JobId, entry: &RetryHistoryEntry) -> Result<()> {
    let path = field_path(layout, id, "retry_history");
    let line = serde_json::to_string(entry).map_err(|e| StorageError::json(path.clone(), e))?;
    let mut contents = read_or_none(&path)?.unwrap_or_default();
    if !contents.is_empty() {
        contents.push('\n');
    }
    contents.push_str(&line);
    write_atomic_str(&path, &contents)
}

pub fn read_retry_history(layout: &DirLayout, id: &JobId) -> Result<Vec<RetryHistoryEntry>> {
    let path = field_path(layout, id, "retry_history");
    match read_or_none(&path)? {
        Some(raw) if !raw.is_empty() => raw
            .lines()
            .map(|line| serde_json::from_str(line).map_err(|e| StorageError::json(path.clone(), e)))
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// Reads every field file for a job and assembles a `Job`. Returns `Ok(None)`
/// when the `state` file is missing (treated as "job absent" by the
/// repository, including never-finished `create` calls).
pub fn read_job(layout: &DirLayout, id: &JobId) -> Result<Option<Job>> {
    let state = match read_state(layout, id)? {
        Some(state) => state,
        None => return Ok(None),
    };
    let command = read_command(layout, id)?.ok_or_else(|| StorageError::Corrupt {
        id: id.to_string(),
        detail: "missing command file".to_string(),
    })?;
    let created_at = read_created_at(layout, id)?.ok_or_else(|| StorageError::Corrupt {
        id: id.to_string(),
        detail: "missing created_at file".to_string(),
    })?;
    let job_config = read_job_config(layout, id)?.unwrap_or_default();

    Ok(Some(Job {
        id: id.clone(),
        command,
        tag: read_tag(layout, id)?,
        state,
        created_at,
        started_at: read_started_at(layout, id)?,
        finished_at: read_finished_at(layout, id)?,
        exit_code: read_exit_code(layout, id)?,
        error: read_error(layout, id)?,
        pid: read_pid(layout, id)?,
        start_time_ticks: read_start_time_ticks(layout, id)?,
        heartbeat: read_heartbeat(layout, id)?,
        retry_count: read_retry_count(layout, id)?,
        retry_at: read_retry_at(layout, id)?,
        retry_history: read_retry_history(layout, id)?,
        job_config,
    }))
}
