//! CLI commands for convoy
//!
//! - **plan**: compute and render the release plan for the current commit
//! - **publish**: execute (or resume) a release run; dry-run by default
//! - **status**: show persisted run state and lock for this workspace
//! - **unlock**: reclaim a stale workspace lock
//!
//! Commands share one assembly path: discover packages, anchor to the
//! current commit, level the graph, fold in externally-computed versions,
//! and build the plan.

pub mod plan;
pub mod publish;
pub mod status;
pub mod unlock;

pub use plan::run_plan;
pub use publish::run_publish;
pub use status::run_status;
pub use unlock::run_unlock;

use crate::core::config::ConvoyConfig;
use crate::core::error::{ConvoyResult, ResultExt};
use crate::graph::PackageGraph;
use crate::plan::{ExecutionPlan, PackageVersion, VersionBump, build_plan};
use crate::registry::{Registry, TagRegistry};
use crate::vcs::{SystemGit, Vcs};
use crate::workspace::cargo::CargoWorkspace;
use crate::workspace::{Package, Workspace};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a command needs after plan assembly
pub(crate) struct PlanContext {
  pub packages: Vec<Package>,
  pub plan: ExecutionPlan,
  pub sha: String,
  pub workspace: Arc<CargoWorkspace>,
  pub git: Arc<SystemGit>,
  pub config: ConvoyConfig,
}

/// Assemble the plan for the workspace at `root`.
///
/// `cli_exclude` merges with the config's exclude list; `versions_path`
/// overrides the config's `versions_file`.
pub(crate) fn build_plan_context(
  root: &Path,
  cli_exclude: &[String],
  versions_path: Option<&Path>,
) -> ConvoyResult<PlanContext> {
  let config = ConvoyConfig::load_or_default(root)?;

  let workspace = Arc::new(CargoWorkspace::new(root));
  let packages = workspace.discover(&[])?;

  let git = Arc::new(SystemGit::open(root)?);
  let sha = git.current_sha()?;

  let resolved_versions_path = versions_path
    .map(PathBuf::from)
    .or_else(|| config.versions_file.as_ref().map(|p| root.join(p)));
  let versions = load_versions(&packages, resolved_versions_path.as_deref())?;

  let graph = PackageGraph::build(&packages);
  let levels = graph.topo_levels()?;

  // Registry record beats local computation: anything whose target version
  // already has a release tag is treated as published.
  let registry = TagRegistry::new(git.clone());
  let mut already_published = HashSet::new();
  for version in &versions {
    if version.bump != VersionBump::None
      && !version.new_version.is_empty()
      && registry.check_published(&version.name, &version.new_version)?
    {
      already_published.insert(version.name.clone());
    }
  }

  let non_publishable: HashSet<String> = packages
    .iter()
    .filter(|p| !p.publishable)
    .map(|p| p.name.clone())
    .collect();

  let mut exclude = config.exclude.clone();
  exclude.extend(cli_exclude.iter().cloned());

  let plan = build_plan(&versions, &levels, &exclude, &already_published, &non_publishable, &sha);

  Ok(PlanContext {
    packages,
    plan,
    sha,
    workspace,
    git,
    config,
  })
}

/// Load externally-computed versions, padding packages without an entry to
/// bump `none` so the plan covers the whole workspace.
fn load_versions(packages: &[Package], path: Option<&Path>) -> ConvoyResult<Vec<PackageVersion>> {
  let mut versions: Vec<PackageVersion> = match path {
    Some(path) => {
      let content = fs::read_to_string(path).with_context(|| format!("Failed to read versions file {}", path.display()))?;
      let mut versions: Vec<PackageVersion> = serde_json::from_str(&content)
        .with_context(|| format!("Versions file {} is not a JSON list of version records", path.display()))?;
      for version in &mut versions {
        version.resolve_new_version()?;
      }
      versions
    }
    None => Vec::new(),
  };

  let known: HashSet<String> = versions.iter().map(|v| v.name.clone()).collect();
  for package in packages {
    if !known.contains(package.name.as_str()) {
      versions.push(PackageVersion {
        name: package.name.clone(),
        old_version: package.version.clone(),
        new_version: String::new(),
        bump: VersionBump::None,
      });
    }
  }

  Ok(versions)
}
