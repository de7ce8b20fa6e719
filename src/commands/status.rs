//! Status command implementation
//!
//! Shows what an operator needs to diagnose a stuck or interrupted release:
//! the persisted run state (who published, who failed and why, who is still
//! pending) and the workspace lock holder, if any.

use crate::core::error::ConvoyResult;
use crate::lock::{is_process_alive, lock_path, read_lock_info};
use crate::state::{RunState, state_path};
use serde::Serialize;
use std::env;

#[derive(Serialize)]
struct StatusReport {
  run_state: Option<RunState>,
  lock: Option<crate::lock::LockInfo>,
}

/// Run the status command
pub fn run_status(json: bool) -> ConvoyResult<()> {
  let root = env::current_dir()?;

  let state = {
    let path = state_path(&root);
    if path.exists() { Some(RunState::load(&path)?) } else { None }
  };
  let lock = read_lock_info(&lock_path(&root));

  if json {
    let report = StatusReport {
      run_state: state,
      lock,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    return Ok(());
  }

  match &state {
    Some(state) => {
      print!("{}", state.render());
      let pending = state.pending_packages();
      let failed = state.failed_packages();
      if !failed.is_empty() {
        println!();
        println!("❌ Failed: {}", failed.join(", "));
      }
      if !pending.is_empty() {
        println!("⏸️  Pending: {}", pending.join(", "));
        println!();
        println!("Resume with: convoy publish --apply");
      }
    }
    None => println!("✅ No release run in progress"),
  }

  println!();
  match &lock {
    Some(info) => {
      let liveness = if is_process_alive(info.pid) { "alive" } else { "not running" };
      println!("🔒 Lock held: {} (process {})", info.display_summary(), liveness);
    }
    None => println!("🔓 No workspace lock"),
  }

  Ok(())
}
