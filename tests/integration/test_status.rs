//! Status and unlock command end-to-end tests

use crate::helpers::{TestWorkspace, run_convoy, run_convoy_raw, stderr_of, stdout_of};

fn write_lock(ws: &TestWorkspace, pid: u32) {
  let dir = ws.path.join(".convoy");
  std::fs::create_dir_all(&dir).unwrap();
  let hostname = hostname_of();
  let now = std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap()
    .as_secs_f64();
  std::fs::write(
    dir.join("release.lock"),
    format!(
      r#"{{ "pid": {}, "hostname": "{}", "timestamp": {:.3}, "user": "tester" }}"#,
      pid, hostname, now
    ),
  )
  .unwrap();
}

fn hostname_of() -> String {
  let output = std::process::Command::new("hostname").output().unwrap();
  String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn status_with_no_run_reports_clean() {
  let ws = TestWorkspace::new().unwrap();

  let output = run_convoy(&ws.path, &["status"]).unwrap();
  let stdout = stdout_of(&output);

  assert!(stdout.contains("No release run in progress"));
  assert!(stdout.contains("No workspace lock"));
}

#[test]
fn status_renders_persisted_run_state() {
  let ws = TestWorkspace::new().unwrap();
  let dir = ws.path.join(".convoy");
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(
    dir.join("release-state.json"),
    r#"{
  "git_sha": "abc123abc123abc123abc123abc123abc123abc1",
  "created_at": "2026-08-08T10:00:00Z",
  "packages": {
    "core": { "name": "core", "status": "published", "version": "0.6.0", "error": "", "level": 0 },
    "plugin": { "name": "plugin", "status": "failed", "version": "0.6.0", "error": "registry 503", "level": 1 },
    "sample": { "name": "sample", "status": "pending", "version": "0.6.0", "error": "", "level": 2 }
  }
}"#,
  )
  .unwrap();

  let output = run_convoy(&ws.path, &["status"]).unwrap();
  let stdout = stdout_of(&output);

  assert!(stdout.contains("abc123abc"));
  assert!(stdout.contains("registry 503"));
  assert!(stdout.contains("Failed: plugin"));
  assert!(stdout.contains("Pending: sample"));
  assert!(stdout.contains("Resume with"));
}

#[test]
fn status_json_is_parseable() {
  let ws = TestWorkspace::new().unwrap();
  write_lock(&ws, 1);

  let output = run_convoy(&ws.path, &["status", "--json"]).unwrap();
  let parsed: serde_json::Value = serde_json::from_str(&stdout_of(&output)).unwrap();

  assert!(parsed["run_state"].is_null());
  assert_eq!(parsed["lock"]["pid"], 1);
  assert_eq!(parsed["lock"]["user"], "tester");
}

#[test]
fn unlock_with_no_lock_is_a_noop() {
  let ws = TestWorkspace::new().unwrap();

  let output = run_convoy(&ws.path, &["unlock"]).unwrap();
  assert!(stdout_of(&output).contains("No workspace lock"));
}

#[cfg(unix)]
#[test]
fn unlock_removes_stale_lock_from_dead_process() {
  let ws = TestWorkspace::new().unwrap();
  // A positive pid far beyond any real pid_max
  write_lock(&ws, i32::MAX as u32);

  let output = run_convoy(&ws.path, &["unlock"]).unwrap();
  assert!(stdout_of(&output).contains("Removed stale lock"));
  assert!(!ws.path.join(".convoy/release.lock").exists());
}

#[cfg(unix)]
#[test]
fn unlock_refuses_live_lock_without_force() {
  let ws = TestWorkspace::new().unwrap();
  // The test harness's own pid is alive
  write_lock(&ws, std::process::id());

  let output = run_convoy_raw(&ws.path, &["unlock"]).unwrap();
  assert!(!output.status.success());
  assert!(stderr_of(&output).contains("live"));
  assert!(ws.path.join(".convoy/release.lock").exists());

  let output = run_convoy(&ws.path, &["unlock", "--force"]).unwrap();
  assert!(stdout_of(&output).contains("Forcibly removed"));
  assert!(!ws.path.join(".convoy/release.lock").exists());
}

#[test]
fn unlock_removes_unreadable_lock() {
  let ws = TestWorkspace::new().unwrap();
  let dir = ws.path.join(".convoy");
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(dir.join("release.lock"), "garbage {").unwrap();

  let output = run_convoy(&ws.path, &["unlock"]).unwrap();
  assert!(stdout_of(&output).contains("unreadable"));
  assert!(!ws.path.join(".convoy/release.lock").exists());
}
