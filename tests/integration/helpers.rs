//! Test helpers for integration tests

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A test workspace with git history and a small crate graph
pub struct TestWorkspace {
  _root: TempDir,
  pub path: PathBuf,
}

impl TestWorkspace {
  /// Create a workspace with three crates: core ← plugin ← sample
  pub fn new() -> Result<Self> {
    let root = TempDir::new()?;
    let path = root.path().to_path_buf();

    git(&path, &["init", "--initial-branch=main"])?;
    git(&path, &["config", "user.name", "Test User"])?;
    git(&path, &["config", "user.email", "test@example.com"])?;

    std::fs::write(
      path.join("Cargo.toml"),
      r#"[workspace]
members = ["crates/*"]
resolver = "2"
"#,
    )?;

    let ws = Self { _root: root, path };
    ws.add_crate("core", "0.5.0", &[])?;
    ws.add_crate("plugin", "0.5.0", &[("core", "0.5")])?;
    ws.add_crate("sample", "0.5.0", &[("core", "0.5"), ("plugin", "0.5")])?;
    ws.commit("Initial workspace setup")?;

    Ok(ws)
  }

  /// Add a crate to the workspace
  pub fn add_crate(&self, name: &str, version: &str, deps: &[(&str, &str)]) -> Result<PathBuf> {
    let crate_path = self.path.join("crates").join(name);
    std::fs::create_dir_all(crate_path.join("src"))?;

    let mut cargo_toml = format!(
      r#"[package]
name = "{}"
version = "{}"

[dependencies]
"#,
      name, version
    );
    for (dep_name, dep_version) in deps {
      cargo_toml.push_str(&format!(
        "{} = {{ path = \"../{}\", version = \"{}\" }}\n",
        dep_name, dep_name, dep_version
      ));
    }

    std::fs::write(crate_path.join("Cargo.toml"), cargo_toml)?;
    std::fs::write(crate_path.join("src/lib.rs"), "")?;
    Ok(crate_path)
  }

  /// Write a versions file bumping `core` and `plugin` to 0.6.0
  pub fn write_versions_file(&self) -> Result<PathBuf> {
    let path = self.path.join("versions.json");
    std::fs::write(
      &path,
      r#"[
  { "name": "core", "old_version": "0.5.0", "new_version": "0.6.0", "bump": "minor" },
  { "name": "plugin", "old_version": "0.5.0", "new_version": "0.6.0", "bump": "minor" }
]"#,
    )?;
    Ok(path)
  }

  /// Commit current changes, returning the commit SHA
  pub fn commit(&self, message: &str) -> Result<String> {
    git(&self.path, &["add", "."])?;
    git(&self.path, &["commit", "-m", message])?;
    let output = git(&self.path, &["rev-parse", "HEAD"])?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  /// Read a file relative to the workspace root
  pub fn read_file(&self, path: &str) -> Result<String> {
    Ok(std::fs::read_to_string(self.path.join(path))?)
  }
}

/// Run git command in a directory
pub fn git(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = Command::new("git")
    .current_dir(cwd)
    .args(args)
    .output()
    .context("Failed to run git command")?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!("Git command failed: git {}\n{}", args.join(" "), stderr);
  }

  Ok(output)
}

/// Run the convoy CLI, expecting success
pub fn run_convoy(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = run_convoy_raw(cwd, args)?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    anyhow::bail!(
      "convoy command failed: convoy {}\nstdout: {}\nstderr: {}",
      args.join(" "),
      stdout,
      stderr
    );
  }

  Ok(output)
}

/// Run the convoy CLI without asserting on the exit status
pub fn run_convoy_raw(cwd: &Path, args: &[&str]) -> Result<Output> {
  let convoy_bin = env!("CARGO_BIN_EXE_convoy");
  Command::new(convoy_bin)
    .current_dir(cwd)
    .args(args)
    .output()
    .context("Failed to run convoy")
}

pub fn stdout_of(output: &Output) -> String {
  String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr_of(output: &Output) -> String {
  String::from_utf8_lossy(&output.stderr).to_string()
}
