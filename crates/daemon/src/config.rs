//! Configuration loader (spec 4.15, ambient): `barn.toml` deserialized with
//! `serde`/`toml`, every setting defaulted so the file is optional, unknown
//! keys rejected outright, and every validation violation collected into one
//! aggregated error rather than failing on the first.

use std::path::{Path, PathBuf};

use barn_core::JobConfig;
use serde::Deserialize;
use thiserror::Error;

/// Falls back to the platform temp dir only if the OS-level state/home
/// directory can't be resolved at all (e.g. `$HOME`/`$XDG_STATE_HOME`
/// unset and no platform equivalent available).
fn default_base_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join("barn"))
        .unwrap_or_else(|| std::env::temp_dir().join("barn"))
}

fn default_ipc_socket() -> Option<PathBuf> {
    None // resolved relative to base_dir at startup if unset
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stale_heartbeat_threshold_seconds() -> u64 {
    30
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_poll_interval_seconds() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    0
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub cleanup_interval_minutes: u64,
    pub max_age_hours: u64,
    pub keep_failed_jobs: bool,
    pub keep_failed_jobs_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleanup_interval_minutes: 60,
            max_age_hours: 24 * 7,
            keep_failed_jobs: true,
            keep_failed_jobs_hours: 24 * 30,
        }
    }
}

/// Mirrors the settings table in spec 6. Every field has a hardcoded
/// default, so a missing `barn.toml` is not an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_ipc_socket")]
    pub ipc_socket: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_stale_heartbeat_threshold_seconds")]
    pub stale_heartbeat_threshold_seconds: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default)]
    pub default_timeout_seconds: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default)]
    pub retry_on_exit_codes: Vec<i32>,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            ipc_socket: default_ipc_socket(),
            log_level: default_log_level(),
            stale_heartbeat_threshold_seconds: default_stale_heartbeat_threshold_seconds(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            poll_interval_seconds: default_poll_interval_seconds(),
            default_timeout_seconds: None,
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            retry_on_exit_codes: Vec::new(),
            cleanup: CleanupConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

impl Config {
    /// Resolves `--config`/`$BARN_CONFIG` to a path, loads it if present, and
    /// validates the result. A missing file is not an error: defaults apply.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("BARN_CONFIG").ok().map(PathBuf::from));

        let config = match path {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(contents) => toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
                Err(source) => return Err(ConfigError::Read { path, source }),
            },
            None => Config::default(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.max_concurrent_jobs < 1 {
            errors.push("max_concurrent_jobs must be at least 1".to_string());
        }
        if self.poll_interval_seconds == 0 {
            errors.push("poll_interval_seconds must be at least 1".to_string());
        }
        if self.stale_heartbeat_threshold_seconds == 0 {
            errors.push("stale_heartbeat_threshold_seconds must be at least 1".to_string());
        }
        if self.retry_backoff_multiplier < 1.0 {
            errors.push("retry_backoff_multiplier must be >= 1.0".to_string());
        }
        if self.cleanup.cleanup_interval_minutes == 0 {
            errors.push("cleanup.cleanup_interval_minutes must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn ipc_socket_path(&self) -> PathBuf {
        self.ipc_socket.clone().unwrap_or_else(|| self.base_dir.join("barn.sock"))
    }

    /// The default per-job config new submissions receive unless the request
    /// overrides individual fields.
    pub fn default_job_config(&self) -> JobConfig {
        JobConfig {
            default_timeout_seconds: self.default_timeout_seconds,
            max_retries: self.max_retries,
            retry_delay_seconds: self.retry_delay_seconds,
            retry_backoff_multiplier: self.retry_backoff_multiplier,
            retry_on_exit_codes: self.retry_on_exit_codes.clone(),
        }
    }
}
