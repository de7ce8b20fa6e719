//! Publish command end-to-end tests (dry-run surfaces only)

use crate::helpers::{TestWorkspace, run_convoy, stdout_of};

#[test]
fn publish_without_apply_is_a_dry_run() {
  let ws = TestWorkspace::new().unwrap();
  ws.write_versions_file().unwrap();

  let output = run_convoy(&ws.path, &["publish", "--versions", "versions.json"]).unwrap();
  let stdout = stdout_of(&output);

  assert!(stdout.contains("Release Plan"));
  assert!(stdout.contains("dry-run"));
  assert!(stdout.contains("--apply"));

  // Nothing was mutated: no state, no lock, manifests untouched
  assert!(!ws.path.join(".convoy/release-state.json").exists());
  assert!(!ws.path.join(".convoy/release.lock").exists());
  assert!(ws.read_file("crates/plugin/Cargo.toml").unwrap().contains("version = \"0.5\""));
}

#[test]
fn publish_with_nothing_to_do_succeeds() {
  let ws = TestWorkspace::new().unwrap();

  let output = run_convoy(&ws.path, &["publish"]).unwrap();
  assert!(stdout_of(&output).contains("Nothing to publish"));
}

#[test]
fn publish_dry_run_leaves_no_backup_files() {
  let ws = TestWorkspace::new().unwrap();
  ws.write_versions_file().unwrap();

  run_convoy(&ws.path, &["publish", "--versions", "versions.json"]).unwrap();

  for name in ["core", "plugin", "sample"] {
    assert!(!ws.path.join(format!("crates/{}/Cargo.bak", name)).exists());
  }
}
