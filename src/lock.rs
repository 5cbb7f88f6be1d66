//! Advisory lock guarding a full provisioning run.
//!
//! The lock file records the owner's pid and acquisition time. A lock is
//! taken over when its owner is no longer running or when it is older than
//! the configured stale age.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::{BootError, Result};
use crate::layout::ProvisioningTarget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Held lock; the file is removed on drop.
#[derive(Debug)]
pub struct ProvisionLock {
    path: PathBuf,
}

impl ProvisionLock {
    pub fn acquire(target: &ProvisioningTarget, stale_after: Duration) -> Result<Self> {
        let path = target.lock_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // One takeover attempt: a second collision means a live competitor.
        for _ in 0..2 {
            match create_exclusive(&path) {
                Ok(lock) => return Ok(lock),
                Err(BootError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }

            match read_info(&path) {
                Some(info) if !is_stale(&info, stale_after) => {
                    return Err(BootError::Locked {
                        path: path.clone(),
                        pid: info.pid,
                    });
                }
                Some(info) => {
                    tracing::warn!("Taking over stale lock held by pid {} since {}", info.pid, info.acquired_at);
                }
                None => tracing::warn!("Replacing unreadable lock file {}", path.display()),
            }

            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }

        let pid = read_info(&path).map(|i| i.pid).unwrap_or_default();
        Err(BootError::Locked { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProvisionLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Could not release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Publish a fully written lock file, failing with `AlreadyExists` if one is present.
///
/// The content is staged next to the lock and linked into place, so a
/// competitor never reads a half-written file.
fn create_exclusive(path: &Path) -> Result<ProvisionLock> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::Builder::new().prefix(".bootkit-lock.").tempfile_in(dir)?;
    let info = LockInfo {
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    staged.write_all(serde_json::to_string(&info)?.as_bytes())?;
    staged.as_file().sync_all()?;

    staged.persist_noclobber(path).map_err(|e| BootError::Io(e.error))?;
    tracing::debug!("Acquired {}", path.display());
    Ok(ProvisionLock {
        path: path.to_path_buf(),
    })
}

pub fn read_info(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn is_stale(info: &LockInfo, stale_after: Duration) -> bool {
    let age = Utc::now().signed_duration_since(info.acquired_at);
    let too_old = age.to_std().map(|a| a > stale_after).unwrap_or(false);
    too_old || !process_alive(info.pid)
}

fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}
