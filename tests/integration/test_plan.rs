//! Plan command end-to-end tests

use crate::helpers::{TestWorkspace, run_convoy, run_convoy_raw, stderr_of, stdout_of};

#[test]
fn plan_with_no_versions_skips_everything() {
  let ws = TestWorkspace::new().unwrap();

  let output = run_convoy(&ws.path, &["plan"]).unwrap();
  let stdout = stdout_of(&output);

  assert!(stdout.contains("Release Plan"));
  assert!(stdout.contains("SKIPPED"));
  assert!(stdout.contains("Nothing to publish"));
  assert!(!stdout.contains("INCLUDED"));
}

#[test]
fn plan_with_versions_includes_bumped_packages() {
  let ws = TestWorkspace::new().unwrap();
  ws.write_versions_file().unwrap();

  let output = run_convoy(&ws.path, &["plan", "--versions", "versions.json"]).unwrap();
  let stdout = stdout_of(&output);

  assert!(stdout.contains("INCLUDED"));
  assert!(stdout.contains("0.6.0"));
  // sample has no bump entry
  assert!(stdout.contains("SKIPPED"));
  assert!(stdout.contains("included: 2"));
}

#[test]
fn plan_exclude_beats_bump() {
  let ws = TestWorkspace::new().unwrap();
  ws.write_versions_file().unwrap();

  let output = run_convoy(
    &ws.path,
    &["plan", "--versions", "versions.json", "--exclude", "plugin"],
  )
  .unwrap();
  let stdout = stdout_of(&output);

  assert!(stdout.contains("EXCLUDED"));
  assert!(stdout.contains("excluded by config"));
  assert!(stdout.contains("included: 1"));
}

#[test]
fn plan_json_round_trips_and_orders_by_level() {
  let ws = TestWorkspace::new().unwrap();
  ws.write_versions_file().unwrap();

  let output = run_convoy(&ws.path, &["plan", "--versions", "versions.json", "--json"]).unwrap();
  let parsed: serde_json::Value = serde_json::from_str(&stdout_of(&output)).unwrap();

  let entries = parsed["entries"].as_array().unwrap();
  assert_eq!(entries.len(), 3);
  assert_eq!(entries[0]["name"], "core");
  assert_eq!(entries[0]["level"], 0);
  assert_eq!(entries[1]["name"], "plugin");
  assert_eq!(entries[1]["level"], 1);
  assert_eq!(entries[2]["name"], "sample");
  assert_eq!(entries[2]["level"], 2);

  // Anchored to the workspace's HEAD
  assert_eq!(parsed["git_sha"].as_str().unwrap().len(), 40);
}

#[test]
fn plan_tsv_is_machine_readable() {
  let ws = TestWorkspace::new().unwrap();

  let output = run_convoy(&ws.path, &["plan", "--tsv"]).unwrap();
  let stdout = stdout_of(&output);

  let mut lines = stdout.lines();
  assert_eq!(lines.next().unwrap(), "name\tlevel\tcurrent\tnext\tbump\tstatus\treason");
  assert_eq!(stdout.lines().count(), 4);
}

#[test]
fn plan_detects_dependency_cycles() {
  let ws = TestWorkspace::new().unwrap();
  // Make core depend back on sample
  let manifest = ws.path.join("crates/core/Cargo.toml");
  let content = std::fs::read_to_string(&manifest).unwrap();
  std::fs::write(
    &manifest,
    format!("{}sample = {{ path = \"../sample\", version = \"0.5\" }}\n", content),
  )
  .unwrap();
  ws.commit("introduce cycle").unwrap();

  let output = run_convoy_raw(&ws.path, &["plan"]).unwrap();
  assert!(!output.status.success());
  assert!(stderr_of(&output).contains("cycle"));
}

#[test]
fn plan_respects_convoy_toml_exclude() {
  let ws = TestWorkspace::new().unwrap();
  ws.write_versions_file().unwrap();
  std::fs::write(ws.path.join("convoy.toml"), "exclude = [\"core\"]\n").unwrap();

  let output = run_convoy(&ws.path, &["plan", "--versions", "versions.json"]).unwrap();
  let stdout = stdout_of(&output);

  assert!(stdout.contains("excluded: 1"));
  assert!(stdout.contains("included: 1"));
}
