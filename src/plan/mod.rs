//! Execution planning: decide what gets published, in what order, and why
//!
//! `build_plan` is a pure function over its inputs. Every discovered package
//! gets an entry — included, skipped, excluded, already published, or
//! dependency-only — so the plan is a complete audit of the run's scope, not
//! just a publish list. Entries are ordered by (level, name), which makes the
//! listing deterministic even though execution within a level may interleave.
//!
//! Plans are JSON-serializable for CI consumption and carry a content digest
//! so two operators can confirm they are looking at the same plan.

use crate::core::error::ConvoyResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Version bump kind, computed externally from commit history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersionBump {
  /// Major version bump (breaking changes)
  Major,
  /// Minor version bump (new features)
  Minor,
  /// Patch version bump (bug fixes)
  Patch,
  /// Pre-release of the next patch
  Prerelease,
  /// No bump needed (no relevant changes)
  #[default]
  None,
}

impl VersionBump {
  /// Apply bump to a semver version
  pub fn apply(&self, version: &semver::Version) -> semver::Version {
    match self {
      VersionBump::Major => semver::Version::new(version.major + 1, 0, 0),
      VersionBump::Minor => semver::Version::new(version.major, version.minor + 1, 0),
      VersionBump::Patch => semver::Version::new(version.major, version.minor, version.patch + 1),
      VersionBump::Prerelease => {
        let mut next = semver::Version::new(version.major, version.minor, version.patch + 1);
        next.pre = semver::Prerelease::new("rc.1").expect("static prerelease tag");
        next
      }
      VersionBump::None => version.clone(),
    }
  }
}

impl fmt::Display for VersionBump {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      VersionBump::Major => "major",
      VersionBump::Minor => "minor",
      VersionBump::Patch => "patch",
      VersionBump::Prerelease => "prerelease",
      VersionBump::None => "none",
    };
    write!(f, "{}", s)
  }
}

/// Externally-computed version decision for one package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVersion {
  pub name: String,
  pub old_version: String,
  /// Empty when the bump is `none`; derivable from `bump` otherwise
  #[serde(default)]
  pub new_version: String,
  #[serde(default)]
  pub bump: VersionBump,
}

impl PackageVersion {
  /// Fill in `new_version` from the bump kind when the producer omitted it
  pub fn resolve_new_version(&mut self) -> ConvoyResult<()> {
    if self.new_version.is_empty() && self.bump != VersionBump::None {
      let old = semver::Version::parse(&self.old_version)?;
      self.new_version = self.bump.apply(&old).to_string();
    }
    Ok(())
  }
}

/// What the plan decided for one package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
  /// Will be published this run
  Included,
  /// No changes; nothing to publish
  Skipped,
  /// Excluded by configuration, regardless of computed bump
  Excluded,
  /// The registry already has this version; its record wins
  AlreadyPublished,
  /// Not publishable; participates in ordering only
  DependencyOnly,
}

impl fmt::Display for EntryStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      EntryStatus::Included => "INCLUDED",
      EntryStatus::Skipped => "SKIPPED",
      EntryStatus::Excluded => "EXCLUDED",
      EntryStatus::AlreadyPublished => "ALREADY_PUBLISHED",
      EntryStatus::DependencyOnly => "DEPENDENCY_ONLY",
    };
    write!(f, "{}", s)
  }
}

/// One package's line in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
  pub name: String,
  /// Topological level; 0 = no internal dependencies
  pub level: usize,
  pub current_version: String,
  /// Empty when this entry will not bump
  pub next_version: String,
  pub status: EntryStatus,
  pub bump: VersionBump,
  pub reason: String,
  /// Stable ordering index within the plan
  pub index: usize,
}

/// Counts per status across a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlanSummary {
  pub included: usize,
  pub skipped: usize,
  pub excluded: usize,
  pub already_published: usize,
  pub dependency_only: usize,
}

impl PlanSummary {
  pub fn total(&self) -> usize {
    self.included + self.skipped + self.excluded + self.already_published + self.dependency_only
  }
}

impl fmt::Display for PlanSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut parts = Vec::new();
    if self.included > 0 {
      parts.push(format!("included: {}", self.included));
    }
    if self.skipped > 0 {
      parts.push(format!("skipped: {}", self.skipped));
    }
    if self.excluded > 0 {
      parts.push(format!("excluded: {}", self.excluded));
    }
    if self.already_published > 0 {
      parts.push(format!("already_published: {}", self.already_published));
    }
    if self.dependency_only > 0 {
      parts.push(format!("dependency_only: {}", self.dependency_only));
    }
    write!(f, "{{{}}}", parts.join(", "))
  }
}

/// An ordered, annotated release plan. Read-only after construction:
/// replanning a changed workspace produces a fresh plan object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
  pub entries: Vec<PlanEntry>,
  /// Commit the plan was computed against
  pub git_sha: String,
}

/// Build an execution plan.
///
/// Per-package decision, in priority order:
/// 1. in `exclude_names` → EXCLUDED (config beats computed bump)
/// 2. in `already_published` → ALREADY_PUBLISHED (registry record beats
///    local computation)
/// 3. in `non_publishable` → DEPENDENCY_ONLY
/// 4. bump is none → SKIPPED
/// 5. otherwise → INCLUDED
///
/// Pure function: no I/O, identical inputs produce identical plans.
pub fn build_plan(
  versions: &[PackageVersion],
  levels: &[Vec<String>],
  exclude_names: &[String],
  already_published: &HashSet<String>,
  non_publishable: &HashSet<String>,
  git_sha: &str,
) -> ExecutionPlan {
  let by_name: HashMap<&str, &PackageVersion> = versions.iter().map(|v| (v.name.as_str(), v)).collect();
  let exclude: HashSet<&str> = exclude_names.iter().map(String::as_str).collect();

  let mut entries = Vec::new();
  for (level, names) in levels.iter().enumerate() {
    for name in names {
      let version = by_name.get(name.as_str());
      let bump = version.map(|v| v.bump).unwrap_or(VersionBump::None);
      let current_version = version.map(|v| v.old_version.clone()).unwrap_or_default();
      let new_version = version.map(|v| v.new_version.clone()).unwrap_or_default();

      let (status, reason) = if exclude.contains(name.as_str()) {
        (EntryStatus::Excluded, "excluded by config".to_string())
      } else if already_published.contains(name) {
        (EntryStatus::AlreadyPublished, "registry already has this version".to_string())
      } else if non_publishable.contains(name) {
        (EntryStatus::DependencyOnly, "not publishable; dependency only".to_string())
      } else if bump == VersionBump::None {
        (EntryStatus::Skipped, "no changes".to_string())
      } else {
        (
          EntryStatus::Included,
          format!("publish {} → {}", current_version, new_version),
        )
      };

      let next_version = match status {
        EntryStatus::Included | EntryStatus::AlreadyPublished if bump != VersionBump::None => new_version,
        _ => String::new(),
      };

      entries.push(PlanEntry {
        name: name.clone(),
        level,
        current_version,
        next_version,
        status,
        bump,
        reason,
        index: 0,
      });
    }
  }

  entries.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.name.cmp(&b.name)));
  for (index, entry) in entries.iter_mut().enumerate() {
    entry.index = index;
  }

  ExecutionPlan {
    entries,
    git_sha: git_sha.to_string(),
  }
}

impl ExecutionPlan {
  /// Entries that will actually be published this run
  pub fn included(&self) -> impl Iterator<Item = &PlanEntry> {
    self.entries.iter().filter(|e| e.status == EntryStatus::Included)
  }

  /// Look up an entry by package name
  pub fn entry(&self, name: &str) -> Option<&PlanEntry> {
    self.entries.iter().find(|e| e.name == name)
  }

  /// Aggregate counts per status
  pub fn summary(&self) -> PlanSummary {
    let mut summary = PlanSummary::default();
    for entry in &self.entries {
      match entry.status {
        EntryStatus::Included => summary.included += 1,
        EntryStatus::Skipped => summary.skipped += 1,
        EntryStatus::Excluded => summary.excluded += 1,
        EntryStatus::AlreadyPublished => summary.already_published += 1,
        EntryStatus::DependencyOnly => summary.dependency_only += 1,
      }
    }
    summary
  }

  /// Content digest (first 12 hex chars of SHA-256 over the TSV rendering)
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_tsv().as_bytes());
    hasher.update(self.git_sha.as_bytes());
    let full = format!("{:x}", hasher.finalize());
    full[..12].to_string()
  }

  /// Serialize to pretty JSON
  pub fn to_json(&self) -> ConvoyResult<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Tab-delimited rendering for scripts
  pub fn to_tsv(&self) -> String {
    let mut out = String::from("name\tlevel\tcurrent\tnext\tbump\tstatus\treason\n");
    for e in &self.entries {
      out.push_str(&format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
        e.name, e.level, e.current_version, e.next_version, e.bump, e.status, e.reason
      ));
    }
    out
  }

  /// Human-readable table
  pub fn render_table(&self) -> String {
    let name_width = self
      .entries
      .iter()
      .map(|e| e.name.len())
      .chain(std::iter::once("PACKAGE".len()))
      .max()
      .unwrap_or(7);
    let status_width = "ALREADY_PUBLISHED".len();

    let mut out = String::new();
    let sha_short = if self.git_sha.len() >= 9 {
      &self.git_sha[..9]
    } else {
      &self.git_sha
    };
    out.push_str(&format!("📋 Release Plan (commit {}, digest {})\n\n", sha_short, self.digest()));
    out.push_str(&format!(
      "   LVL  {:<name_width$}  {:<10}  {:<10}  {:<10}  {:<status_width$}  REASON\n",
      "PACKAGE", "CURRENT", "NEXT", "BUMP", "STATUS"
    ));
    for e in &self.entries {
      let next = if e.next_version.is_empty() { "-" } else { e.next_version.as_str() };
      out.push_str(&format!(
        "   {:>3}  {:<name_width$}  {:<10}  {:<10}  {:<10}  {:<status_width$}  {}\n",
        e.level,
        e.name,
        e.current_version,
        next,
        e.bump.to_string(),
        e.status.to_string(),
        e.reason
      ));
    }
    out.push_str(&format!("\n   Summary: {}\n", self.summary()));
    out
  }
}
