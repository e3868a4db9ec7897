use std::fs;
use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{info, warn};

use crate::error::{AgentError, Result};

pub const LOCK_FILE: &str = ".scan_agent_sgich.lock";

/// Process images that may legitimately own the lock: this binary (the
/// kernel may truncate its name, so the brand prefix counts too), and the
/// legacy Python agent it replaced (deployments migrate host by host).
const KNOWN_IMAGES: [&str; 5] = ["scanagent", "scan-agent", "scan_agent", "sgich", "python"];

/// Exclusive ownership of the per-host instance lock. Dropping the guard
/// removes the PID file, on every exit path including unwinding.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // The configurator may reclaim the lock for a relaunched agent while
        // this process is still winding down a cycle; only the current owner
        // gets to delete the file.
        let owned = fs::read_to_string(&self.path)
            .ok()
            .and_then(|body| body.trim().parse::<u32>().ok())
            .is_some_and(|pid| pid == std::process::id());
        if !owned {
            warn!("lock file {} no longer ours, leaving it in place", self.path.display());
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("could not remove lock file {}: {e}", self.path.display());
        }
    }
}

/// Fixed dotfile in the user's home; body is the decimal PID of the owner.
pub fn lock_path() -> PathBuf {
    match home::home_dir() {
        Some(path) if !path.as_os_str().is_empty() => path.join(LOCK_FILE),
        _ => PathBuf::from(LOCK_FILE),
    }
}

/// Acquires the single-instance lock at `path`.
///
/// A present lock file is only honored when its PID is numeric, alive, and
/// the process image looks like a scan agent; everything else is a stale or
/// reused record and gets reclaimed. Errors with `LockConflict` when a live
/// sibling owns the lock.
pub fn acquire(path: &Path) -> Result<LockGuard> {
    if path.exists() {
        let body = fs::read_to_string(path).unwrap_or_default();
        match body.trim().parse::<u32>() {
            Err(_) => {
                warn!("lock file {} is not a PID, reclaiming", path.display());
            }
            Ok(pid) => {
                if let Some(image) = process_image(pid) {
                    let image = image.to_lowercase();
                    if KNOWN_IMAGES.iter().any(|k| image.contains(k)) {
                        return Err(AgentError::LockConflict(pid));
                    }
                    warn!("lock held by pid {pid} ({image}), not an agent; reclaiming reused PID");
                } else {
                    info!("lock held by dead pid {pid}, reclaiming");
                }
            }
        }
        fs::remove_file(path)?;
    }

    fs::write(path, std::process::id().to_string())?;
    Ok(LockGuard { path: path.to_path_buf() })
}

/// Name of the process currently running under `pid`, or `None` when no
/// such process is alive.
fn process_image(pid: u32) -> Option<String> {
    let mut sys = System::new();
    let target = Pid::from_u32(pid);
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::new(),
    );
    sys.process(target)
        .map(|p| p.name().to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_pid_and_drop_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        {
            let guard = acquire(&path).unwrap();
            let body = fs::read_to_string(guard.path()).unwrap();
            assert_eq!(body, std::process::id().to_string());
        }
        assert!(!path.exists());
    }

    #[test]
    fn drop_leaves_a_lock_rewritten_by_a_successor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        let guard = acquire(&path).unwrap();
        // A relaunched agent reclaimed the lock while we were winding down.
        fs::write(&path, "999999").unwrap();
        drop(guard);
        assert_eq!(fs::read_to_string(&path).unwrap(), "999999");
    }

    #[test]
    fn non_numeric_record_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        fs::write(&path, "not-a-pid").unwrap();
        let guard = acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(guard.path()).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        // PIDs near the 32-bit ceiling are far beyond any default pid_max.
        fs::write(&path, "4294967294").unwrap();
        assert!(acquire(&path).is_ok());
    }

    #[test]
    fn live_agent_process_means_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        // The test binary itself is named after the crate, so our own PID
        // passes the image check and must be treated as a live sibling.
        let other = std::process::id();
        fs::write(&path, other.to_string()).unwrap();
        match acquire(&path) {
            Err(AgentError::LockConflict(pid)) => assert_eq!(pid, other),
            other => panic!("expected LockConflict, got {other:?}"),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), other.to_string());
    }
}
