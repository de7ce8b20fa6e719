//! Cargo workspace backend
//!
//! Discovers packages by walking `[workspace] members` in the root manifest
//! and parsing each member's Cargo.toml with `toml_edit`, so discovery works
//! without a `cargo` binary on PATH. Internal dependencies are those whose
//! normalized name matches another workspace member; `dev-dependencies` are
//! deliberately not graph edges (dev-only cycles are routine in workspaces
//! and do not constrain publish order).

use crate::core::error::{ConvoyError, ConvoyResult, ResultExt};
use crate::workspace::{Package, Workspace, matches_pattern, normalize_name};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::DocumentMut;

/// Dependency tables that create publish-order edges
const EDGE_TABLES: [&str; 2] = ["dependencies", "build-dependencies"];

/// All dependency tables convoy will rewrite
const ALL_TABLES: [&str; 3] = ["dependencies", "dev-dependencies", "build-dependencies"];

pub struct CargoWorkspace {
  root: PathBuf,
}

impl CargoWorkspace {
  pub fn new(root: &Path) -> Self {
    Self { root: root.to_path_buf() }
  }

  /// Expand `[workspace] members` entries into package directories.
  ///
  /// Supports literal paths and a trailing `/*` glob, which covers the
  /// layouts convoy targets. Entries that do not resolve to a directory
  /// with a Cargo.toml are skipped.
  fn member_dirs(&self, doc: &DocumentMut) -> ConvoyResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    let members = doc
      .get("workspace")
      .and_then(|w| w.get("members"))
      .and_then(|m| m.as_array());

    if let Some(members) = members {
      for member in members {
        let Some(entry) = member.as_str() else { continue };

        if let Some(prefix) = entry.strip_suffix("/*") {
          let base = self.root.join(prefix);
          if !base.is_dir() {
            continue;
          }
          let mut expanded: Vec<PathBuf> = fs::read_dir(&base)
            .with_context(|| format!("Failed to read workspace member directory {}", base.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.join("Cargo.toml").is_file())
            .collect();
          expanded.sort();
          dirs.extend(expanded);
        } else {
          let dir = self.root.join(entry);
          if dir.join("Cargo.toml").is_file() {
            dirs.push(dir);
          }
        }
      }
    }

    // Non-virtual workspaces: the root manifest may itself be a package
    if doc.get("package").is_some() && !dirs.contains(&self.root) {
      dirs.push(self.root.clone());
    }

    Ok(dirs)
  }

  fn parse_manifest(path: &Path) -> ConvoyResult<DocumentMut> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let doc: DocumentMut = content.parse()?;
    Ok(doc)
  }

  /// Read the publishable flag: `publish = false` or `publish = []` opt out.
  fn is_publishable(doc: &DocumentMut) -> bool {
    match doc.get("package").and_then(|p| p.get("publish")) {
      Some(item) => {
        if let Some(b) = item.as_bool() {
          b
        } else if let Some(arr) = item.as_array() {
          !arr.is_empty()
        } else {
          true
        }
      }
      None => true,
    }
  }

  /// Collect dependency names from the given tables of a manifest.
  ///
  /// A renamed dependency (`alias = { package = "real-name" }`) contributes
  /// its real package name.
  fn dependency_names(doc: &DocumentMut, tables: &[&str]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for table in tables {
      if let Some(deps) = doc.get(table).and_then(|t| t.as_table_like()) {
        for (key, item) in deps.iter() {
          let real = item
            .get("package")
            .and_then(|p| p.as_str())
            .unwrap_or(key)
            .to_string();
          names.insert(real);
        }
      }
    }
    names.into_iter().collect()
  }
}

impl Workspace for CargoWorkspace {
  fn discover(&self, exclude_patterns: &[String]) -> ConvoyResult<Vec<Package>> {
    let root_manifest = self.root.join("Cargo.toml");
    let root_doc = Self::parse_manifest(&root_manifest)?;
    let dirs = self.member_dirs(&root_doc)?;

    // First pass: parse manifests and collect the member name set
    let mut parsed = Vec::new();
    for dir in dirs {
      let manifest_path = dir.join("Cargo.toml");
      let doc = if dir == self.root {
        root_doc.clone()
      } else {
        Self::parse_manifest(&manifest_path)?
      };

      let Some(name) = doc
        .get("package")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
      else {
        continue;
      };

      if exclude_patterns.iter().any(|p| matches_pattern(&name, p)) {
        continue;
      }

      let version = doc
        .get("package")
        .and_then(|p| p.get("version"))
        .and_then(|v| v.as_str())
        .unwrap_or("0.0.0")
        .to_string();

      parsed.push((name, version, dir, manifest_path, doc));
    }

    let member_names: BTreeSet<String> = parsed.iter().map(|(name, ..)| normalize_name(name)).collect();

    // Second pass: classify dependencies as internal or external
    let mut packages = Vec::new();
    for (name, version, path, manifest_path, doc) in parsed {
      let publishable = Self::is_publishable(&doc);
      let edge_deps = Self::dependency_names(&doc, &EDGE_TABLES);

      let mut internal_deps = Vec::new();
      let mut external_deps = Vec::new();
      for dep in edge_deps {
        if member_names.contains(&normalize_name(&dep)) && normalize_name(&dep) != normalize_name(&name) {
          internal_deps.push(dep);
        } else {
          external_deps.push(dep);
        }
      }

      packages.push(Package {
        name,
        version,
        path,
        manifest_path,
        internal_deps,
        external_deps,
        publishable,
      });
    }

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packages)
  }

  fn rewrite_version(&self, manifest_path: &Path, new_version: &str) -> ConvoyResult<String> {
    let mut doc = Self::parse_manifest(manifest_path)?;

    let package = doc
      .get_mut("package")
      .and_then(|p| p.as_table_mut())
      .ok_or_else(|| ConvoyError::message(format!("No [package] section in {}", manifest_path.display())))?;

    let old = package
      .get("version")
      .and_then(|v| v.as_str())
      .unwrap_or("0.0.0")
      .to_string();
    package["version"] = toml_edit::value(new_version);

    fs::write(manifest_path, doc.to_string())
      .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
    Ok(old)
  }

  fn rewrite_dependency_version(&self, manifest_path: &Path, dep_name: &str, new_version: &str) -> ConvoyResult<()> {
    let mut doc = Self::parse_manifest(manifest_path)?;
    let target = normalize_name(dep_name);
    let mut touched = false;

    for table in ALL_TABLES {
      if let Some(deps) = doc.get_mut(table).and_then(|t| t.as_table_like_mut()) {
        let keys: Vec<String> = deps.iter().map(|(k, _)| k.to_string()).collect();
        for key in keys {
          let Some(item) = deps.get_mut(&key) else { continue };
          let real = item.get("package").and_then(|p| p.as_str()).unwrap_or(&key);
          if normalize_name(real) != target {
            continue;
          }

          if item.is_str() {
            *item = toml_edit::value(new_version);
            touched = true;
          } else if let Some(t) = item.as_table_like_mut() {
            t.insert("version", toml_edit::value(new_version));
            touched = true;
          }
        }
      }
    }

    if touched {
      fs::write(manifest_path, doc.to_string())
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
    }
    Ok(())
  }
}
