//! Process liveness, tree termination, and the PID-reuse guard (spec 4.5,
//! 9). Grounded in `tumf-agent-exec::kill` for the signal-selection and
//! tree-walk shape, reimplemented on the safe `nix` crate on Unix since this
//! workspace forbids `unsafe_code`; the Windows path still needs raw FFI and
//! is scoped behind `#[allow(unsafe_code)]` the way
//! `054316dc_..._windows_kill_tree.rs` does it.

pub fn current_pid() -> u32 {
    std::process::id()
}

/// True if `pid` refers to a live process. On Unix this is a signal-0
/// probe; `EPERM` still means the process exists, just owned by someone
/// else, which can't happen for Barn's own children but is handled anyway.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Sends a termination signal to `pid`'s entire process group. Barn spawns
/// every child as its own group leader (see `runner::spawn_child`), so
/// `pid == pgid` and a single `killpg` reaches descendants too. `force`
/// selects `SIGKILL` over `SIGTERM`. Returns whether a live target was
/// signaled; a group that's already gone is not an error.
#[cfg(unix)]
pub fn kill_tree(pid: u32, force: bool) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    killpg(Pid::from_raw(pid as i32), signal).is_ok()
}

/// Start-time identity for the PID-reuse race (spec 9): the OS can recycle a
/// pid between when Barn recorded it and when crash recovery observes it
/// again. Reads field 22 (`starttime`, ticks since boot) from
/// `/proc/<pid>/stat`; comparing this value at spawn time against recovery
/// time tells apart "still our child" from "a new process reused the pid".
/// Returns `None` if the file can't be read (process gone, or a platform
/// without `/proc`), in which case callers fall back to heartbeat staleness
/// alone and log a warning.
#[cfg(unix)]
pub fn start_time_ticks(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // `comm` (field 2) is parenthesized and may itself contain spaces or
    // parens, so locate it by the last ')' rather than splitting on whitespace.
    let after_comm = stat.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(19)?.parse().ok()
}

#[cfg(not(unix))]
pub fn start_time_ticks(_pid: u32) -> Option<u64> {
    None
}

#[cfg(windows)]
mod windows_impl {
    #![allow(unsafe_code)]

    use windows::Win32::Foundation::{CloseHandle, HANDLE, STILL_ACTIVE};
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        PROCESS_TERMINATE,
    };

    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    pub fn is_alive(pid: u32) -> bool {
        unsafe {
            let Ok(handle) = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) else {
                return false;
            };
            let handle = OwnedHandle(handle);
            let mut exit_code = 0u32;
            match GetExitCodeProcess(handle.0, &mut exit_code) {
                Ok(()) => exit_code == STILL_ACTIVE.0 as u32,
                Err(_) => false,
            }
        }
    }

    /// Windows has no SIGTERM equivalent Barn can rely on universally, so
    /// both graceful and forced requests terminate immediately; the
    /// distinction only matters for the Unix signal choice.
    pub fn kill_tree(pid: u32, _force: bool) -> bool {
        let Some(children) = descendants(pid) else {
            return terminate_one(pid);
        };
        let mut any = terminate_one(pid);
        for child in children {
            any |= kill_tree(child, true);
        }
        any
    }

    fn terminate_one(pid: u32) -> bool {
        unsafe {
            let Ok(handle) = OpenProcess(PROCESS_TERMINATE, false, pid) else {
                return false;
            };
            let handle = OwnedHandle(handle);
            TerminateProcess(handle.0, 1).is_ok()
        }
    }

    /// Direct children of `pid`, found via a toolhelp snapshot. `None` if the
    /// snapshot itself couldn't be taken; an empty vec is a normal leaf.
    fn descendants(pid: u32) -> Option<Vec<u32>> {
        use windows::Win32::System::Diagnostics::ToolHelp::{
            CreateToolhelp32Snapshot, Process32First, Process32Next, PROCESSENTRY32,
            TH32CS_SNAPPROCESS,
        };

        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).ok()?;
            let handle = OwnedHandle(snapshot);
            let mut entry = PROCESSENTRY32 {
                dwSize: std::mem::size_of::<PROCESSENTRY32>() as u32,
                ..Default::default()
            };
            let mut children = Vec::new();
            if Process32First(handle.0, &mut entry).is_ok() {
                loop {
                    if entry.th32ParentProcessID == pid {
                        children.push(entry.th32ProcessID);
                    }
                    if Process32Next(handle.0, &mut entry).is_err() {
                        break;
                    }
                }
            }
            Some(children)
        }
    }
}

#[cfg(windows)]
pub fn is_alive(pid: u32) -> bool {
    windows_impl::is_alive(pid)
}

#[cfg(windows)]
pub fn kill_tree(pid: u32, force: bool) -> bool {
    windows_impl::kill_tree(pid, force)
}
