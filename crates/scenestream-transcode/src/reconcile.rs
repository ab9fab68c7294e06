//! Startup reconciliation of leftovers from a previous server process.
//!
//! Sessions are held in memory only, so anything under the work directory at
//! startup belongs to a dead server. Encoders that outlived it are found via
//! their pid files and terminated; the stale session directories are removed.

use std::path::{Path, PathBuf};

use scenestream_common::{Result, SessionId};
use walkdir::WalkDir;

/// Name of the pid file each encoder writes into its quality directory.
pub const PID_FILE_NAME: &str = "encoder.pid";

/// Outcome of [`reconcile_orphans`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pids that were still alive and got SIGTERM.
    pub orphans_signalled: Vec<u32>,
    /// Session directories removed.
    pub directories_removed: Vec<PathBuf>,
}

/// Kill orphaned encoders and remove stale session directories under `work_dir`.
///
/// Only directories whose name is a session id are touched. A missing
/// work directory is not an error.
pub fn reconcile_orphans(work_dir: &Path) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    if !work_dir.exists() {
        return Ok(report);
    }

    for entry in WalkDir::new(work_dir)
        .min_depth(3)
        .max_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_name() != PID_FILE_NAME || !is_session_path(work_dir, entry.path()) {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let Ok(pid) = contents.trim().parse::<u32>() else {
            tracing::warn!("Ignoring malformed pid file {}", entry.path().display());
            continue;
        };
        if signal_orphan(pid, work_dir) {
            tracing::warn!(pid, "Terminated orphaned encoder");
            report.orphans_signalled.push(pid);
        }
    }

    for entry in std::fs::read_dir(work_dir)? {
        let entry = entry?;
        let is_session = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.parse::<SessionId>().is_ok());
        if !is_session || !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_dir_all(&path) {
            Ok(()) => report.directories_removed.push(path),
            Err(e) => tracing::error!("Failed to remove stale session dir {}: {e}", path.display()),
        }
    }

    if !report.directories_removed.is_empty() {
        tracing::info!(
            orphans = report.orphans_signalled.len(),
            directories = report.directories_removed.len(),
            "Reconciled work directory"
        );
    }
    Ok(report)
}

/// `<work_dir>/<session_id>/<quality>/encoder.pid`
fn is_session_path(work_dir: &Path, pid_file: &Path) -> bool {
    pid_file
        .strip_prefix(work_dir)
        .ok()
        .and_then(|rel| rel.components().next())
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|name| name.parse::<SessionId>().is_ok())
}

#[cfg(unix)]
fn signal_orphan(pid: u32, work_dir: &Path) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let target = Pid::from_raw(raw);
    if kill(target, None).is_err() {
        return false;
    }
    // The pid may have been recycled; only signal a process that was
    // started with arguments pointing into our work directory.
    match std::fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(cmdline) => {
            let cmdline = String::from_utf8_lossy(&cmdline);
            if !cmdline.contains(&*work_dir.to_string_lossy()) {
                return false;
            }
        }
        Err(_) => return false,
    }
    kill(target, Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn signal_orphan(_pid: u32, _work_dir: &Path) -> bool {
    false
}
