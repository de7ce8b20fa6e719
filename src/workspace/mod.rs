//! Workspace discovery boundary
//!
//! A `Workspace` is the monorepo root plus one ecosystem's package-discovery
//! rules. Discovery itself is swappable: the orchestration engine only sees
//! the `Package` model and the three operations below. The bundled backend
//! is [`cargo::CargoWorkspace`]; other ecosystems implement the same trait
//! and are validated by the shared conformance test.

pub mod cargo;

use crate::core::error::ConvoyResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A discovered package. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
  /// Package name, unique within the workspace
  pub name: String,
  /// Version currently recorded in the manifest
  pub version: String,
  /// Package root directory
  pub path: PathBuf,
  /// Path to the package manifest
  pub manifest_path: PathBuf,
  /// Names of dependencies that live in this workspace
  pub internal_deps: Vec<String>,
  /// Names of dependencies resolved outside the workspace
  pub external_deps: Vec<String>,
  /// Whether this package may be published at all
  pub publishable: bool,
}

/// Package discovery and manifest mutation for one ecosystem.
pub trait Workspace {
  /// Discover all packages, skipping names matched by `exclude_patterns`
  /// (exact names or trailing-`*` globs).
  fn discover(&self, exclude_patterns: &[String]) -> ConvoyResult<Vec<Package>>;

  /// Set the package's own version in its manifest. Returns the old version.
  fn rewrite_version(&self, manifest_path: &Path, new_version: &str) -> ConvoyResult<String>;

  /// Set the version reference for one dependency in a manifest.
  fn rewrite_dependency_version(&self, manifest_path: &Path, dep_name: &str, new_version: &str) -> ConvoyResult<()>;
}

/// Canonical form of a package name for matching across manifests.
///
/// Matching is conservative: when two spellings do not normalize to the same
/// string, they are different packages and no pin or rewrite is applied.
pub fn normalize_name(name: &str) -> String {
  name.trim().to_ascii_lowercase().replace('_', "-")
}

/// Check a package name against an exclude pattern (exact or trailing `*`).
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
  if let Some(prefix) = pattern.strip_suffix('*') {
    name.starts_with(prefix)
  } else {
    name == pattern
  }
}
