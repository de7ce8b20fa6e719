//! Workspace lock: one release run per workspace root
//!
//! An advisory JSON lock file records who owns the run (pid, hostname,
//! user, acquisition time). Acquisition is `create_new` (O_CREAT|O_EXCL), so
//! two processes racing for the same workspace cannot both win. A lock whose
//! owning process is provably dead is stale and reclaimed; a lock we cannot
//! judge is conservatively treated as live. Release never deletes a lock
//! file the caller does not own, and the RAII guard is gated the same way so
//! a forked child cannot delete its parent's still-active lock.

use crate::core::error::{ConvoyResult, LockError, ResultExt};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lock file location under a workspace root
pub fn lock_path(root: &Path) -> PathBuf {
  root.join(".convoy").join("release.lock")
}

/// Metadata stored in the lock file for diagnostics and staleness checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
  /// Process ID of the lock holder
  pub pid: u32,
  /// Hostname where the lock was acquired
  pub hostname: String,
  /// Acquisition time, seconds since the Unix epoch
  pub timestamp: f64,
  /// Username of the lock holder (may be empty)
  #[serde(default)]
  pub user: String,
}

impl LockInfo {
  /// Lock metadata for the current process
  pub fn current() -> Self {
    Self {
      pid: std::process::id(),
      hostname: hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string()),
      timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
      user: whoami::username(),
    }
  }

  /// Seconds since this lock was acquired
  pub fn age_secs(&self) -> f64 {
    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
    (now - self.timestamp).max(0.0)
  }

  /// Whether this lock was created on the host we are running on
  pub fn same_host(&self) -> bool {
    let current = hostname::get()
      .map(|h| h.to_string_lossy().to_string())
      .unwrap_or_default();
    self.hostname == current
  }

  /// One-line description for contention errors and `convoy status`
  pub fn display_summary(&self) -> String {
    let user = if self.user.is_empty() { "?" } else { &self.user };
    format!(
      "PID {} by {}@{}, acquired {:.0}s ago",
      self.pid,
      user,
      self.hostname,
      self.age_secs()
    )
  }

  /// Staleness rule: the owning process must be provably dead, and either
  /// the lock is from this host (so the probe was authoritative) or it has
  /// outlived the timeout.
  pub fn is_stale(&self, stale_timeout: Duration) -> bool {
    if is_process_alive(self.pid) {
      return false;
    }
    self.same_host() || self.age_secs() > stale_timeout.as_secs_f64()
  }
}

/// Non-destructive liveness probe.
///
/// A lack-of-permission result means the pid exists but belongs to someone
/// else: that is a live process, not a stale one.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
  if pid == 0 {
    return false;
  }
  let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
  if rc == 0 {
    return true;
  }
  matches!(std::io::Error::last_os_error().raw_os_error(), Some(libc::EPERM))
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
  // No portable probe here; never treat a lock as provably dead
  true
}

/// Read lock metadata if the file exists and parses
pub fn read_lock_info(path: &Path) -> Option<LockInfo> {
  let content = fs::read_to_string(path).ok()?;
  serde_json::from_str(&content).ok()
}

/// A held workspace lock. Released on drop, gated on pid ownership.
#[derive(Debug)]
pub struct WorkspaceLock {
  path: PathBuf,
  pid: u32,
  released: bool,
}

impl WorkspaceLock {
  /// Acquire the workspace lock for `root`.
  ///
  /// An existing lock file that is unparseable or missing required fields
  /// is treated as absent. A stale lock (see [`LockInfo::is_stale`]) is
  /// reclaimed. Anything else fails with the holder's metadata.
  pub fn acquire(root: &Path, stale_timeout: Duration) -> ConvoyResult<Self> {
    let path = lock_path(root);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // One reclamation attempt, then a clean retry; a second conflict means
    // someone else won the race and holds a live lock.
    for _ in 0..2 {
      match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
          let info = LockInfo::current();
          let json = serde_json::to_string_pretty(&info)?;
          file.write_all(json.as_bytes()).context("Failed to write lock file")?;
          file.sync_all().context("Failed to flush lock file")?;
          tracing::debug!(path = %path.display(), pid = info.pid, "workspace lock acquired");
          return Ok(Self {
            path,
            pid: info.pid,
            released: false,
          });
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
          match read_lock_info(&path) {
            Some(info) => {
              if info.is_stale(stale_timeout) {
                tracing::warn!(
                  pid = info.pid,
                  host = %info.hostname,
                  "reclaiming stale workspace lock from dead process"
                );
                let _ = fs::remove_file(&path);
                continue;
              }
              return Err(LockError::Held { path, info }.into());
            }
            None => {
              // Corrupt or incomplete lock file: treat as absent
              tracing::warn!(path = %path.display(), "discarding unreadable lock file");
              let _ = fs::remove_file(&path);
              continue;
            }
          }
        }
        Err(e) => return Err(e.into()),
      }
    }

    match read_lock_info(&path) {
      Some(info) => Err(LockError::Held { path, info }.into()),
      None => Err(
        LockError::Held {
          path,
          info: LockInfo {
            pid: 0,
            hostname: "unknown".to_string(),
            timestamp: 0.0,
            user: String::new(),
          },
        }
        .into(),
      ),
    }
  }

  #[allow(dead_code)]
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Remove the lock file if and only if it still records our pid.
  /// Absent or foreign-owned files are a no-op, not an error.
  pub fn release(&mut self) -> ConvoyResult<()> {
    if self.released {
      return Ok(());
    }
    self.released = true;

    match read_lock_info(&self.path) {
      Some(info) if info.pid == self.pid => {
        fs::remove_file(&self.path).with_context(|| format!("Failed to remove {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "workspace lock released");
      }
      _ => {
        tracing::debug!(path = %self.path.display(), "lock file absent or foreign-owned, leaving it");
      }
    }
    Ok(())
  }
}

impl Drop for WorkspaceLock {
  fn drop(&mut self) {
    // Exit-time cleanup, gated on pid so a forked child cannot delete the
    // parent's still-active lock.
    if !self.released && std::process::id() == self.pid {
      let _ = self.release();
    }
  }
}
