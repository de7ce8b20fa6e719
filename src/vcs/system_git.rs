//! System git backend - zero dependencies, maximum performance
//!
//! Uses git plumbing commands with an isolated subprocess environment so a
//! user's global configuration cannot change behavior mid-release.

use crate::core::error::{ConvoyError, ConvoyResult, ResultExt};
use crate::vcs::Vcs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Git backend using system git (zero crate dependencies)
pub struct SystemGit {
  /// Repository working directory
  repo_path: PathBuf,
}

impl SystemGit {
  /// Open a git repository at `path`
  pub fn open(path: &Path) -> ConvoyResult<Self> {
    let output = Command::new("git")
      .arg("-C")
      .arg(path)
      .args(["rev-parse", "--show-toplevel"])
      .output()
      .context("Failed to execute git rev-parse")?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(ConvoyError::message(format!(
        "Failed to open git repository at {}: {}",
        path.display(),
        stderr.trim()
      )));
    }

    Ok(Self {
      repo_path: path.to_path_buf(),
    })
  }

  /// Create a safe git command with isolated environment
  ///
  /// - Sets working directory to repo path
  /// - Clears environment variables
  /// - Whitelists only PATH and HOME
  /// - Adds safe configuration overrides
  fn git_cmd(&self) -> Command {
    let mut cmd = Command::new("git");

    cmd.arg("-C").arg(&self.repo_path);

    // Isolated environment (don't trust global config)
    cmd.env_clear();
    if let Ok(path) = std::env::var("PATH") {
      cmd.env("PATH", path);
    }
    if let Ok(home) = std::env::var("HOME") {
      cmd.env("HOME", home);
    }

    cmd.arg("-c").arg("protocol.version=2");
    cmd.arg("-c").arg("advice.detachedHead=false");

    cmd
  }

  /// Create an annotated tag at HEAD
  pub fn create_tag(&self, name: &str, message: &str) -> ConvoyResult<()> {
    let output = self
      .git_cmd()
      .args(["tag", "-a", name, "-m", message])
      .output()
      .context("Failed to run git tag")?;

    if !output.status.success() {
      return Err(ConvoyError::message(format!(
        "git tag failed: {}",
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }
    Ok(())
  }
}

impl Vcs for SystemGit {
  fn current_sha(&self) -> ConvoyResult<String> {
    let output = self
      .git_cmd()
      .args(["rev-parse", "HEAD"])
      .output()
      .context("Failed to get HEAD commit")?;

    if !output.status.success() {
      return Err(ConvoyError::message(format!(
        "git rev-parse HEAD failed: {}",
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  fn tag_exists(&self, name: &str) -> ConvoyResult<bool> {
    let output = self
      .git_cmd()
      .args(["tag", "-l", name])
      .output()
      .context("Failed to list git tags")?;

    if !output.status.success() {
      return Err(ConvoyError::message(format!(
        "git tag -l failed: {}",
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
  }
}
