//! Gateway daemon liveness tracking — PID file and status (spec §4.1, §10.6).
//!
//! `epiloop gateway` runs the gateway in the foreground and records its
//! own PID here so a separate `epiloop status` invocation can report
//! whether it is still alive. `--force` clears a stale PID file left
//! behind by a process that didn't exit cleanly.
//!
//! Liveness uses `sysinfo` for cross-platform support (macOS, Linux,
//! Windows) with no `cfg(unix)` gates.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sysinfo::{Pid, System};

// ── PID file helpers ────────────────────────────────────────────────────────

/// Returns the path to the PID file: `<settings_dir>/gateway.pid`.
pub fn pid_path(settings_dir: &Path) -> PathBuf {
    settings_dir.join("gateway.pid")
}

/// Returns the path to the gateway log file: `<settings_dir>/logs/gateway.log`.
pub fn log_path(settings_dir: &Path) -> PathBuf {
    settings_dir.join("logs").join("gateway.log")
}

/// Write a PID to the PID file.
pub fn write_pid(settings_dir: &Path, pid: u32) -> Result<()> {
    let path = pid_path(settings_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, pid.to_string())
        .with_context(|| format!("Failed to write PID file {}", path.display()))
}

/// Read the stored PID, if the file exists and is valid.
pub fn read_pid(settings_dir: &Path) -> Option<u32> {
    let path = pid_path(settings_dir);
    fs::read_to_string(&path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Remove the PID file.
pub fn remove_pid(settings_dir: &Path) {
    let path = pid_path(settings_dir);
    let _ = fs::remove_file(&path);
}

/// Check whether a process with the given PID is alive.
pub fn is_process_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes(
        sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]),
        true,
    );
    sys.process(Pid::from_u32(pid)).is_some()
}

// ── High-level status ───────────────────────────────────────────────────────

/// Status of the gateway daemon.
#[derive(Debug, Clone)]
pub enum DaemonStatus {
    /// Running with the given PID.
    Running { pid: u32 },
    /// PID file exists but the process is dead.
    Stale { pid: u32 },
    /// No PID file — not running.
    Stopped,
}

/// Check the current daemon status.
pub fn status(settings_dir: &Path) -> DaemonStatus {
    match read_pid(settings_dir) {
        Some(pid) => {
            if is_process_alive(pid) {
                DaemonStatus::Running { pid }
            } else {
                DaemonStatus::Stale { pid }
            }
        }
        None => DaemonStatus::Stopped,
    }
}
