//! Output rendering (spec 4.18): `--output text` (default) prints a
//! human-readable summary, `--output json` prints the raw IPC payload
//! unmodified so scripts can parse it directly. Grounded in the teacher's
//! `output.rs` `OutputFormat` enum shape.

use clap::ValueEnum;
use serde_json::Value;

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn field<'a>(job: &'a Value, name: &str) -> &'a str {
    job.get(name).and_then(Value::as_str).unwrap_or("-")
}

pub fn render_job(job: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(job).unwrap_or_default()),
        OutputFormat::Text => {
            println!("id:         {}", field(job, "id"));
            println!("state:      {}", field(job, "state"));
            println!("command:    {}", render_command(job));
            println!("tag:        {}", job.get("tag").and_then(Value::as_str).unwrap_or("-"));
            println!("created_at: {}", field(job, "created_at"));
            if let Some(exit_code) = job.get("exit_code") {
                if !exit_code.is_null() {
                    println!("exit_code:  {exit_code}");
                }
            }
            if let Some(error) = job.get("error").and_then(Value::as_str) {
                println!("error:      {error}");
            }
            println!("retries:    {}", job.get("retry_count").and_then(Value::as_u64).unwrap_or(0));
        }
    }
}

fn render_command(job: &Value) -> String {
    job.get("command")
        .and_then(Value::as_array)
        .map(|args| {
            args.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

pub fn render_job_list(payload: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(payload).unwrap_or_default()),
        OutputFormat::Text => {
            let jobs = payload.get("jobs").and_then(Value::as_array).cloned().unwrap_or_default();
            if jobs.is_empty() {
                println!("no jobs");
                return;
            }
            println!("{:<38} {:<10} {:<12} {}", "ID", "STATE", "TAG", "COMMAND");
            for job in &jobs {
                println!(
                    "{:<38} {:<10} {:<12} {}",
                    field(job, "id"),
                    field(job, "state"),
                    job.get("tag").and_then(Value::as_str).unwrap_or("-"),
                    render_command(job),
                );
            }
        }
    }
}

pub fn render_service_status(payload: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(payload).unwrap_or_default()),
        OutputFormat::Text => {
            println!("pid:      {}", payload.get("pid").map(ToString::to_string).unwrap_or_default());
            println!("version:  {}", field(payload, "version"));
            println!(
                "uptime:   {}s",
                payload.get("uptime_seconds").map(ToString::to_string).unwrap_or_default()
            );
            println!("total:    {}", payload.get("total_jobs").map(ToString::to_string).unwrap_or_default());
            if let Some(by_state) = payload.get("jobs_by_state").and_then(Value::as_object) {
                for (state, count) in by_state {
                    println!("  {state:<10} {count}");
                }
            }
        }
    }
}

pub fn render_reload(payload: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(payload).unwrap_or_default()),
        OutputFormat::Text => {
            let applied = payload.get("applied").and_then(Value::as_array).cloned().unwrap_or_default();
            let requires_restart = payload.get("requires_restart").and_then(Value::as_array).cloned().unwrap_or_default();
            println!("applied:");
            for setting in &applied {
                println!("  {}", setting.as_str().unwrap_or_default());
            }
            println!("requires restart:");
            for setting in &requires_restart {
                println!("  {}", setting.as_str().unwrap_or_default());
            }
        }
    }
}

pub fn render_clean(payload: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(payload).unwrap_or_default()),
        OutputFormat::Text => {
            let dry_run = payload.get("dry_run").and_then(Value::as_bool).unwrap_or(false);
            let count = payload.get("count").and_then(Value::as_u64).unwrap_or(0);
            if dry_run {
                println!("{count} job(s) would be deleted");
            } else {
                println!("{count} job(s) deleted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_command_joins_argv() {
        let job = serde_json::json!({"command": ["echo", "hi there"]});
        assert_eq!(render_command(&job), "echo hi there");
    }
}
