//! Unlock command implementation
//!
//! Applies the same staleness rule the orchestrator uses at acquisition
//! time, on demand. `--force` skips the rule for the case where the
//! operator knows better than the probe (e.g. a lock from a dead container
//! that reused a live host pid).

use crate::core::config::ConvoyConfig;
use crate::core::error::{ConvoyError, ConvoyResult};
use crate::lock::{lock_path, read_lock_info};
use std::env;
use std::fs;
use std::time::Duration;

/// Run the unlock command
pub fn run_unlock(force: bool) -> ConvoyResult<()> {
  let root = env::current_dir()?;
  let config = ConvoyConfig::load_or_default(&root)?;
  let path = lock_path(&root);

  if !path.exists() {
    println!("🔓 No workspace lock to remove");
    return Ok(());
  }

  match read_lock_info(&path) {
    None => {
      // Unreadable lock files are reclaimable by definition
      fs::remove_file(&path)?;
      println!("🧹 Removed unreadable lock file");
      Ok(())
    }
    Some(info) => {
      let stale = info.is_stale(Duration::from_secs(config.stale_lock_timeout_secs));
      if stale || force {
        fs::remove_file(&path)?;
        if force && !stale {
          println!("🧹 Forcibly removed lock ({})", info.display_summary());
        } else {
          println!("🧹 Removed stale lock ({})", info.display_summary());
        }
        Ok(())
      } else {
        Err(ConvoyError::with_help(
          format!("Lock appears to be live: {}", info.display_summary()),
          "If you are certain the owning run is gone, use `convoy unlock --force`.",
        ))
      }
    }
  }
}
