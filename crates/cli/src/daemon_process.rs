//! Starting and stopping `barnd` as a background process (spec 4.18's
//! `service start`/`service stop`). Grounded in the teacher's
//! `daemon_process.rs` (`start_daemon_background`, sibling-binary lookup).

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::client::ClientError;

/// Locates the `barnd` binary: next to the running `barn` executable first
/// (the normal installed layout), falling back to `$PATH` lookup so a
/// cargo-installed or system-installed pair still works.
fn find_barnd_binary() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(barnd_file_name());
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from(barnd_file_name())
}

#[cfg(windows)]
fn barnd_file_name() -> &'static str {
    "barnd.exe"
}

#[cfg(not(windows))]
fn barnd_file_name() -> &'static str {
    "barnd"
}

/// Spawns `barnd` detached from the CLI's stdio so it survives the CLI
/// process exiting.
pub fn start_daemon_background(config_path: Option<&Path>) -> Result<std::process::Child, ClientError> {
    let mut cmd = Command::new(find_barnd_binary());
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| ClientError::DaemonStartFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_bare_binary_name_when_no_sibling_exists() {
        let path = find_barnd_binary();
        assert_eq!(path.file_name().unwrap().to_string_lossy(), barnd_file_name());
    }
}
