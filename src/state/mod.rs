//! Durable, resumable run state
//!
//! One JSON file per workspace root records every package's publish status,
//! anchored to the commit the run started from. The file is rewritten after
//! every status change with a write-to-temp-then-rename discipline, so a
//! crash loses at most the in-flight transition and never leaves a corrupt
//! file where resume will look. Versions computed for one commit must never
//! be replayed onto another commit's tree; `validate_sha` is that guard.

use crate::core::error::{ConvoyError, ConvoyResult, ResultExt, StateError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// State file location under a workspace root
pub fn state_path(root: &Path) -> PathBuf {
  root.join(".convoy").join("release-state.json")
}

/// Per-package publish status.
///
/// `pending → building → publishing → verifying → published`, with
/// `pending → skipped` and any non-terminal state `→ failed`. Terminal
/// statuses are never left within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PackageStatus {
  Pending,
  Building,
  Publishing,
  Verifying,
  Published,
  Skipped,
  Failed,
}

impl PackageStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, PackageStatus::Published | PackageStatus::Skipped | PackageStatus::Failed)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      PackageStatus::Pending => "pending",
      PackageStatus::Building => "building",
      PackageStatus::Publishing => "publishing",
      PackageStatus::Verifying => "verifying",
      PackageStatus::Published => "published",
      PackageStatus::Skipped => "skipped",
      PackageStatus::Failed => "failed",
    }
  }
}

impl std::fmt::Display for PackageStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Unknown or garbled persisted values fall back to `pending`: on state-file
/// bit-rot we prefer retrying a package over losing the run.
impl From<String> for PackageStatus {
  fn from(s: String) -> Self {
    match s.as_str() {
      "pending" => PackageStatus::Pending,
      "building" => PackageStatus::Building,
      "publishing" => PackageStatus::Publishing,
      "verifying" => PackageStatus::Verifying,
      "published" => PackageStatus::Published,
      "skipped" => PackageStatus::Skipped,
      "failed" => PackageStatus::Failed,
      other => {
        tracing::warn!(status = other, "unknown package status in state file, treating as pending");
        PackageStatus::Pending
      }
    }
  }
}

impl From<PackageStatus> for String {
  fn from(status: PackageStatus) -> Self {
    status.as_str().to_string()
  }
}

/// Mutable per-package record within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
  pub name: String,
  pub status: PackageStatus,
  /// Target version for this run
  pub version: String,
  /// Populated only when status is `failed`
  pub error: String,
  /// Topological level, copied from the plan for resume-time ordering
  pub level: usize,
}

/// The durable record of one release run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
  /// Commit the run is anchored to
  pub git_sha: String,
  pub created_at: String,
  pub packages: BTreeMap<String, PackageState>,
}

impl RunState {
  pub fn new(git_sha: &str) -> Self {
    Self {
      git_sha: git_sha.to_string(),
      created_at: Utc::now().to_rfc3339(),
      packages: BTreeMap::new(),
    }
  }

  /// Register a package before work starts. A package already present
  /// (resume) keeps its recorded status.
  pub fn init_package(&mut self, name: &str, version: &str, level: usize) {
    self.packages.entry(name.to_string()).or_insert_with(|| PackageState {
      name: name.to_string(),
      status: PackageStatus::Pending,
      version: version.to_string(),
      error: String::new(),
      level,
    });
  }

  /// Transition a package. Returns `Ok(true)` if the status changed,
  /// `Ok(false)` if the package is already terminal (transitions are
  /// monotonic and terminal states are final within a run).
  pub fn set_status(&mut self, name: &str, status: PackageStatus, error: &str) -> ConvoyResult<bool> {
    let package = self
      .packages
      .get_mut(name)
      .ok_or_else(|| ConvoyError::message(format!("Package '{}' is not tracked by this run", name)))?;

    if package.status.is_terminal() {
      tracing::debug!(
        package = name,
        current = %package.status,
        requested = %status,
        "ignoring transition out of terminal status"
      );
      return Ok(false);
    }

    package.status = status;
    package.error = if status == PackageStatus::Failed {
      error.to_string()
    } else {
      String::new()
    };
    Ok(true)
  }

  fn names_with(&self, wanted: PackageStatus) -> Vec<String> {
    // BTreeMap iteration keeps these sorted by name
    self
      .packages
      .values()
      .filter(|p| p.status == wanted)
      .map(|p| p.name.clone())
      .collect()
  }

  pub fn pending_packages(&self) -> Vec<String> {
    self.names_with(PackageStatus::Pending)
  }

  pub fn failed_packages(&self) -> Vec<String> {
    self.names_with(PackageStatus::Failed)
  }

  pub fn published_packages(&self) -> Vec<String> {
    self.names_with(PackageStatus::Published)
  }

  /// Put failed packages back to `pending` for an operator-requested retry.
  /// This is the one sanctioned exit from a terminal status, and it only
  /// happens at the start of a resumed run, never mid-flight.
  pub fn reset_failed(&mut self) -> Vec<String> {
    let mut reset = Vec::new();
    for package in self.packages.values_mut() {
      if package.status == PackageStatus::Failed {
        package.status = PackageStatus::Pending;
        package.error = String::new();
        reset.push(package.name.clone());
      }
    }
    reset
  }

  /// True only when every tracked package is in a terminal status
  pub fn is_complete(&self) -> bool {
    self.packages.values().all(|p| p.status.is_terminal())
  }

  /// Refuse to resume against a different commit than the run was anchored
  /// to: versions and pins computed for one tree do not transfer.
  pub fn validate_sha(&self, current_sha: &str) -> ConvoyResult<()> {
    if self.git_sha != current_sha {
      return Err(
        StateError::ShaMismatch {
          run_sha: self.git_sha.clone(),
          current_sha: current_sha.to_string(),
        }
        .into(),
      );
    }
    Ok(())
  }

  /// Persist atomically: write to a uniquely-named temp file in the target's
  /// directory, flush, then rename over the target. A crash mid-write leaves
  /// the previous valid file untouched.
  pub fn save(&self, path: &Path) -> ConvoyResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;

    let json = serde_json::to_string_pretty(self)?;
    let mut tmp = NamedTempFile::new_in(parent).context("Failed to create temporary state file")?;
    tmp.write_all(json.as_bytes()).context("Failed to write state")?;
    tmp.as_file().sync_all().context("Failed to flush state")?;
    tmp
      .persist(path)
      .map_err(|e| ConvoyError::Io(e.error))
      .with_context(|| format!("Failed to replace {}", path.display()))?;

    tracing::debug!(path = %path.display(), packages = self.packages.len(), "run state saved");
    Ok(())
  }

  /// Load persisted state. Malformed content (including missing required
  /// fields) is a distinct corruption error so callers can offer the
  /// delete-and-restart remedy; plain I/O failures pass through unchanged.
  pub fn load(path: &Path) -> ConvoyResult<Self> {
    let content = fs::read_to_string(path)?;
    let state: RunState = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })?;
    Ok(state)
  }

  /// Remove the state file once a run has fully completed
  pub fn delete(path: &Path) -> ConvoyResult<()> {
    if path.exists() {
      fs::remove_file(path).with_context(|| format!("Failed to delete {}", path.display()))?;
    }
    Ok(())
  }

  /// Human-readable rendering for `convoy status`
  pub fn render(&self) -> String {
    let sha_short = if self.git_sha.len() >= 9 {
      &self.git_sha[..9]
    } else {
      &self.git_sha
    };
    let mut out = format!("🗂  Release run at commit {} (started {})\n", sha_short, self.created_at);
    for package in self.packages.values() {
      let marker = match package.status {
        PackageStatus::Published => "✅",
        PackageStatus::Skipped => "⏭️ ",
        PackageStatus::Failed => "❌",
        PackageStatus::Pending => "⏸️ ",
        _ => "🔄",
      };
      out.push_str(&format!(
        "   {} {} {} [{}]",
        marker, package.name, package.version, package.status
      ));
      if !package.error.is_empty() {
        out.push_str(&format!(" — {}", package.error));
      }
      out.push('\n');
    }
    out
  }
}
