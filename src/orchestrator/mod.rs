//! Release run orchestration
//!
//! Drives an execution plan to completion: the workspace lock guards the
//! whole run, the run state is saved after every status transition, and
//! packages flow `pending → building → publishing → verifying → published`
//! (or `failed`). Levels are strictly sequential — a dependent's pin step
//! needs its dependency's final published version — while packages within a
//! level run concurrently on a bounded worker pool. A failure never aborts
//! siblings in the same level; it only blocks later packages that depend on
//! the failed one, which stay `pending` so a resumed run can pick them up.

use crate::core::config::{DEFAULT_CONCURRENCY, DEFAULT_STALE_LOCK_TIMEOUT_SECS};
use crate::core::error::{ConvoyError, ConvoyResult, ResultExt};
use crate::graph::PackageGraph;
use crate::lock::WorkspaceLock;
use crate::pin::EphemeralPin;
use crate::plan::ExecutionPlan;
use crate::registry::{Registry, release_tag};
use crate::state::{PackageStatus, RunState, state_path};
use crate::ui::progress::MultiProgress;
use crate::vcs::SystemGit;
use crate::workspace::{Package, Workspace, normalize_name};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The isolated build/publish step for one package. Runs inside an
/// ephemeral-pin scope; everything I/O-bound in a release run happens here.
pub trait Publisher: Send + Sync {
  fn publish(&self, package: &Package, version: &str) -> ConvoyResult<()>;
}

/// Publisher that does nothing. Used by tests and conformance checks.
#[allow(dead_code)]
pub struct DryRunPublisher;

impl Publisher for DryRunPublisher {
  fn publish(&self, package: &Package, version: &str) -> ConvoyResult<()> {
    tracing::debug!(package = %package.name, version, "dry-run publish");
    Ok(())
  }
}

/// Publishes a crate with `cargo publish` and records the release tag.
pub struct CargoPublisher {
  vcs: Arc<SystemGit>,
}

impl CargoPublisher {
  pub fn new(vcs: Arc<SystemGit>) -> Self {
    Self { vcs }
  }
}

impl Publisher for CargoPublisher {
  fn publish(&self, package: &Package, version: &str) -> ConvoyResult<()> {
    let output = Command::new("cargo")
      .arg("publish")
      .arg("--manifest-path")
      .arg(&package.manifest_path)
      .arg("--allow-dirty")
      .output()
      .context("Failed to run cargo publish")?;

    if !output.status.success() {
      return Err(ConvoyError::message(format!(
        "cargo publish failed for {}:\n{}",
        package.name,
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    let tag = release_tag(&package.name, version);
    self
      .vcs
      .create_tag(&tag, &format!("Release {} v{}", package.name, version))?;
    Ok(())
  }
}

/// Knobs for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
  /// Packages published concurrently within one level
  pub concurrency: usize,
  /// Wait between a publish and its verification (registry propagation)
  pub publish_delay: Duration,
  /// Staleness threshold for lock reclamation
  pub stale_lock_timeout: Duration,
  /// Put previously-failed packages back in play when resuming
  pub retry_failed: bool,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      concurrency: DEFAULT_CONCURRENCY,
      publish_delay: Duration::ZERO,
      stale_lock_timeout: Duration::from_secs(DEFAULT_STALE_LOCK_TIMEOUT_SECS),
      retry_failed: false,
    }
  }
}

/// What a run ended with
#[derive(Debug, Clone)]
pub struct RunOutcome {
  pub published: Vec<String>,
  pub failed: Vec<String>,
  /// Included packages left pending because a dependency failed
  pub blocked: Vec<String>,
  /// Whether every tracked package reached a terminal status
  pub complete: bool,
}

pub struct Orchestrator {
  root: PathBuf,
  packages: Vec<Package>,
  workspace: Arc<dyn Workspace + Send + Sync>,
  publisher: Arc<dyn Publisher>,
  registry: Arc<dyn Registry + Send + Sync>,
  options: RunOptions,
}

impl Orchestrator {
  pub fn new(
    root: &Path,
    packages: Vec<Package>,
    workspace: Arc<dyn Workspace + Send + Sync>,
    publisher: Arc<dyn Publisher>,
    registry: Arc<dyn Registry + Send + Sync>,
    options: RunOptions,
  ) -> Self {
    Self {
      root: root.to_path_buf(),
      packages,
      workspace,
      publisher,
      registry,
      options,
    }
  }

  /// Execute (or resume) a run for `plan`.
  ///
  /// `current_sha` is the workspace's commit right now; a persisted run
  /// anchored to a different commit refuses to resume.
  pub fn run(&self, plan: &ExecutionPlan, current_sha: &str) -> ConvoyResult<RunOutcome> {
    let _lock = WorkspaceLock::acquire(&self.root, self.options.stale_lock_timeout)?;

    let path = state_path(&self.root);
    let mut state = if path.exists() {
      let state = RunState::load(&path)?;
      state.validate_sha(current_sha)?;
      tracing::info!(pending = state.pending_packages().len(), "resuming existing run state");
      state
    } else {
      RunState::new(current_sha)
    };

    if self.options.retry_failed {
      let reset = state.reset_failed();
      if !reset.is_empty() {
        println!("🔁 Retrying previously failed packages: {}", reset.join(", "));
      }
    }

    for entry in plan.included() {
      state.init_package(&entry.name, &entry.next_version, entry.level);
    }
    state.save(&path)?;

    let graph = PackageGraph::build(&self.packages);
    let package_by_name: HashMap<&str, &Package> = self.packages.iter().map(|p| (p.name.as_str(), p)).collect();
    let final_versions = self.final_versions(plan);

    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.options.concurrency)
      .build()
      .map_err(|e| ConvoyError::message(format!("Failed to build worker pool: {}", e)))?;
    let progress = MultiProgress::new();

    let max_level = plan.included().map(|e| e.level).max();
    let state = Arc::new(Mutex::new(state));

    if let Some(max_level) = max_level {
      for level in 0..=max_level {
        let failed: HashSet<String> = {
          let guard = state.lock().unwrap_or_else(|e| e.into_inner());
          guard.failed_packages().into_iter().collect()
        };

        let runnable: Vec<String> = {
          let guard = state.lock().unwrap_or_else(|e| e.into_inner());
          plan
            .included()
            .filter(|e| e.level == level)
            .filter(|e| guard.packages.get(&e.name).is_some_and(|p| p.status == PackageStatus::Pending))
            .filter(|e| {
              let deps = graph.transitive_deps(&e.name);
              let blocked = deps.iter().any(|d| failed.contains(d));
              if blocked {
                tracing::warn!(package = %e.name, "blocked by failed dependencies, leaving pending");
              }
              !blocked
            })
            .map(|e| e.name.clone())
            .collect()
        };

        if runnable.is_empty() {
          continue;
        }

        let published_before: HashSet<String> = {
          let guard = state.lock().unwrap_or_else(|e| e.into_inner());
          guard.published_packages().into_iter().collect()
        };

        let bar = progress.add_bar(runnable.len(), format!("level {}", level));
        pool.install(|| {
          runnable.par_iter().for_each(|name| {
            self.run_package(name, &package_by_name, &final_versions, &state, &path);
            progress.inc(&bar);
          });
        });

        // Dependents everywhere in the workspace now reference the versions
        // that actually shipped this level
        let published_now: Vec<String> = {
          let guard = state.lock().unwrap_or_else(|e| e.into_inner());
          guard
            .published_packages()
            .into_iter()
            .filter(|n| !published_before.contains(n))
            .collect()
        };
        for name in &published_now {
          if let Some(version) = final_versions.get(name) {
            self.rewrite_dependents(name, version);
          }
        }

        // Between-level checkpoint: state on disk reflects the whole level
        let guard = state.lock().unwrap_or_else(|e| e.into_inner());
        guard.save(&path)?;
      }
    }

    let state = state.lock().unwrap_or_else(|e| e.into_inner());
    let complete = state.is_complete();
    let outcome = RunOutcome {
      published: state.published_packages(),
      failed: state.failed_packages(),
      blocked: state.pending_packages(),
      complete,
    };

    if complete {
      RunState::delete(&path)?;
      tracing::info!("run complete, state file removed");
    } else {
      state.save(&path)?;
    }

    Ok(outcome)
  }

  /// Final version each package will have after this run: the plan's next
  /// version for included packages, the manifest version otherwise.
  fn final_versions(&self, plan: &ExecutionPlan) -> HashMap<String, String> {
    let mut versions: HashMap<String, String> = self
      .packages
      .iter()
      .map(|p| (p.name.clone(), p.version.clone()))
      .collect();
    for entry in plan.included() {
      if !entry.next_version.is_empty() {
        versions.insert(entry.name.clone(), entry.next_version.clone());
      }
    }
    versions
  }

  /// Point every dependent's manifest at the version `name` just shipped as
  fn rewrite_dependents(&self, name: &str, version: &str) {
    for package in &self.packages {
      let depends = package
        .internal_deps
        .iter()
        .any(|d| normalize_name(d) == normalize_name(name));
      if !depends {
        continue;
      }
      if let Err(e) = self
        .workspace
        .rewrite_dependency_version(&package.manifest_path, name, version)
      {
        tracing::error!(
          package = %package.name,
          dependency = name,
          error = %e,
          "failed to update dependency reference after publish"
        );
      }
    }
  }

  /// One package's full status arc. Errors are recorded in the run state,
  /// never propagated — siblings keep going.
  fn run_package(
    &self,
    name: &str,
    package_by_name: &HashMap<&str, &Package>,
    final_versions: &HashMap<String, String>,
    state: &Arc<Mutex<RunState>>,
    state_file: &Path,
  ) {
    let Some(package) = package_by_name.get(name) else {
      transition(state, state_file, name, PackageStatus::Failed, "package vanished from workspace");
      return;
    };
    let Some(version) = final_versions.get(name).cloned() else {
      transition(state, state_file, name, PackageStatus::Failed, "no target version");
      return;
    };

    transition(state, state_file, name, PackageStatus::Building, "");

    // The package's own version bump is permanent; only dependency pins are
    // ephemeral
    if package.version != version {
      if let Err(e) = self.workspace.rewrite_version(&package.manifest_path, &version) {
        transition(
          state,
          state_file,
          name,
          PackageStatus::Failed,
          &format!("version rewrite failed: {}", e),
        );
        return;
      }
    }

    let pins: BTreeMap<String, String> = package
      .internal_deps
      .iter()
      .filter_map(|dep| {
        final_versions
          .iter()
          .find(|(k, _)| normalize_name(k) == normalize_name(dep))
          .map(|(_, v)| (dep.clone(), v.clone()))
      })
      .collect();

    let mut pin = match EphemeralPin::apply(&package.manifest_path, &pins) {
      Ok(pin) => pin,
      Err(e) => {
        transition(state, state_file, name, PackageStatus::Failed, &format!("pin failed: {}", e));
        return;
      }
    };
    tracing::debug!(package = name, pins = pin.pins_applied(), "isolated build scope open");

    transition(state, state_file, name, PackageStatus::Publishing, "");
    let publish_result = self.publisher.publish(package, &version);
    pin.restore();

    if let Err(e) = publish_result {
      transition(state, state_file, name, PackageStatus::Failed, &e.to_string());
      return;
    }

    if !self.options.publish_delay.is_zero() {
      std::thread::sleep(self.options.publish_delay);
    }

    transition(state, state_file, name, PackageStatus::Verifying, "");
    match self.registry.check_published(name, &version) {
      Ok(true) => transition(state, state_file, name, PackageStatus::Published, ""),
      Ok(false) => transition(
        state,
        state_file,
        name,
        PackageStatus::Failed,
        "published but not visible in registry",
      ),
      Err(e) => transition(
        state,
        state_file,
        name,
        PackageStatus::Failed,
        &format!("registry check failed: {}", e),
      ),
    }
  }
}

/// Apply one status transition and persist it. A failed save is logged, not
/// fatal: the in-memory run continues and the next checkpoint retries.
fn transition(state: &Arc<Mutex<RunState>>, path: &Path, name: &str, status: PackageStatus, error: &str) {
  let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
  match guard.set_status(name, status, error) {
    Ok(true) => {
      if let Err(e) = guard.save(path) {
        tracing::error!(package = name, error = %e, "failed to persist state transition");
      }
    }
    Ok(false) => {}
    Err(e) => tracing::error!(package = name, error = %e, "untracked package in transition"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::plan::{PackageVersion, VersionBump, build_plan};
  use crate::registry::StaticRegistry;
  use crate::workspace::cargo::CargoWorkspace;
  use std::fs;
  use tempfile::TempDir;

  fn test_workspace(root: &Path) -> Arc<dyn Workspace + Send + Sync> {
    Arc::new(CargoWorkspace::new(root))
  }

  /// Publisher that records call order and can be told to fail
  struct RecordingPublisher {
    calls: Mutex<Vec<String>>,
    fail: HashSet<String>,
  }

  impl RecordingPublisher {
    fn new(fail: &[&str]) -> Self {
      Self {
        calls: Mutex::new(Vec::new()),
        fail: fail.iter().map(|s| s.to_string()).collect(),
      }
    }

    fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }
  }

  impl Publisher for RecordingPublisher {
    fn publish(&self, package: &Package, _version: &str) -> ConvoyResult<()> {
      self.calls.lock().unwrap().push(package.name.clone());
      if self.fail.contains(&package.name) {
        return Err(ConvoyError::message(format!("induced failure for {}", package.name)));
      }
      Ok(())
    }
  }

  fn make_package(root: &Path, name: &str, version: &str, internal_deps: &[&str]) -> Package {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    let manifest = dir.join("Cargo.toml");
    let mut deps = String::new();
    for dep in internal_deps {
      deps.push_str(&format!("{} = {{ path = \"../{}\" }}\n", dep, dep));
    }
    fs::write(
      &manifest,
      format!(
        "[package]\nname = \"{}\"\nversion = \"{}\"\n\n[dependencies]\n{}",
        name, version, deps
      ),
    )
    .unwrap();

    Package {
      name: name.to_string(),
      version: version.to_string(),
      path: dir.clone(),
      manifest_path: manifest,
      internal_deps: internal_deps.iter().map(|s| s.to_string()).collect(),
      external_deps: vec![],
      publishable: true,
    }
  }

  fn fixture(root: &Path) -> (Vec<Package>, ExecutionPlan) {
    let packages = vec![
      make_package(root, "core", "0.5.0", &[]),
      make_package(root, "plugin", "0.5.0", &["core"]),
      make_package(root, "sample", "0.5.0", &["core", "plugin"]),
    ];
    let versions: Vec<PackageVersion> = packages
      .iter()
      .map(|p| PackageVersion {
        name: p.name.clone(),
        old_version: p.version.clone(),
        new_version: "0.6.0".to_string(),
        bump: VersionBump::Minor,
      })
      .collect();
    let levels = PackageGraph::build(&packages).topo_levels().unwrap();
    let plan = build_plan(
      &versions,
      &levels,
      &[],
      &HashSet::new(),
      &HashSet::new(),
      "sha-test",
    );
    (packages, plan)
  }

  fn registry_with_all() -> Arc<StaticRegistry> {
    Arc::new(
      StaticRegistry::new()
        .with_published("core", "0.6.0")
        .with_published("plugin", "0.6.0")
        .with_published("sample", "0.6.0"),
    )
  }

  #[test]
  fn test_full_run_publishes_in_dependency_order() {
    let dir = TempDir::new().unwrap();
    let (packages, plan) = fixture(dir.path());
    let publisher = Arc::new(RecordingPublisher::new(&[]));

    let orchestrator = Orchestrator::new(
      dir.path(),
      packages,
      test_workspace(dir.path()),
      publisher.clone(),
      registry_with_all(),
      RunOptions::default(),
    );
    let outcome = orchestrator.run(&plan, "sha-test").unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.published, vec!["core", "plugin", "sample"]);
    assert!(outcome.failed.is_empty());

    let calls = publisher.calls();
    let pos = |n: &str| calls.iter().position(|c| c == n).unwrap();
    assert!(pos("core") < pos("plugin"));
    assert!(pos("plugin") < pos("sample"));

    // Completed run leaves no state file behind
    assert!(!state_path(dir.path()).exists());
  }

  #[test]
  fn test_failure_blocks_dependents_but_not_siblings() {
    let dir = TempDir::new().unwrap();
    let packages = vec![
      make_package(dir.path(), "core", "0.5.0", &[]),
      make_package(dir.path(), "standalone", "0.5.0", &[]),
      make_package(dir.path(), "plugin", "0.5.0", &["core"]),
    ];
    let versions: Vec<PackageVersion> = packages
      .iter()
      .map(|p| PackageVersion {
        name: p.name.clone(),
        old_version: p.version.clone(),
        new_version: "0.6.0".to_string(),
        bump: VersionBump::Minor,
      })
      .collect();
    let levels = PackageGraph::build(&packages).topo_levels().unwrap();
    let plan = build_plan(&versions, &levels, &[], &HashSet::new(), &HashSet::new(), "sha-test");

    let publisher = Arc::new(RecordingPublisher::new(&["core"]));
    let registry = Arc::new(
      StaticRegistry::new()
        .with_published("standalone", "0.6.0")
        .with_published("plugin", "0.6.0"),
    );
    let orchestrator = Orchestrator::new(
      dir.path(),
      packages,
      test_workspace(dir.path()),
      publisher.clone(),
      registry,
      RunOptions::default(),
    );
    let outcome = orchestrator.run(&plan, "sha-test").unwrap();

    assert!(!outcome.complete);
    assert_eq!(outcome.failed, vec!["core"]);
    // standalone shares level 0 with core and still published
    assert_eq!(outcome.published, vec!["standalone"]);
    // plugin depends on the failure and was never attempted
    assert_eq!(outcome.blocked, vec!["plugin"]);
    assert!(!publisher.calls().contains(&"plugin".to_string()));

    // Incomplete run keeps its state for resume
    assert!(state_path(dir.path()).exists());
  }

  #[test]
  fn test_resume_skips_published_and_retries_failed_on_request() {
    let dir = TempDir::new().unwrap();
    let (packages, plan) = fixture(dir.path());

    // First attempt: plugin fails
    let publisher = Arc::new(RecordingPublisher::new(&["plugin"]));
    let orchestrator = Orchestrator::new(
      dir.path(),
      packages.clone(),
      test_workspace(dir.path()),
      publisher.clone(),
      registry_with_all(),
      RunOptions::default(),
    );
    let outcome = orchestrator.run(&plan, "sha-test").unwrap();
    assert_eq!(outcome.published, vec!["core"]);
    assert_eq!(outcome.failed, vec!["plugin"]);
    assert_eq!(outcome.blocked, vec!["sample"]);

    // Resume with retry: core must not publish again
    let publisher = Arc::new(RecordingPublisher::new(&[]));
    let orchestrator = Orchestrator::new(
      dir.path(),
      packages,
      test_workspace(dir.path()),
      publisher.clone(),
      registry_with_all(),
      RunOptions {
        retry_failed: true,
        ..RunOptions::default()
      },
    );
    let outcome = orchestrator.run(&plan, "sha-test").unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.published, vec!["core", "plugin", "sample"]);
    assert_eq!(publisher.calls(), vec!["plugin", "sample"]);
  }

  #[test]
  fn test_resume_against_moved_workspace_refused() {
    let dir = TempDir::new().unwrap();
    let (packages, plan) = fixture(dir.path());

    let publisher = Arc::new(RecordingPublisher::new(&["plugin"]));
    let orchestrator = Orchestrator::new(
      dir.path(),
      packages.clone(),
      test_workspace(dir.path()),
      publisher,
      registry_with_all(),
      RunOptions::default(),
    );
    orchestrator.run(&plan, "sha-test").unwrap();
    assert!(state_path(dir.path()).exists());

    // Workspace moved to another commit between runs
    let orchestrator = Orchestrator::new(
      dir.path(),
      packages,
      test_workspace(dir.path()),
      Arc::new(RecordingPublisher::new(&[])),
      registry_with_all(),
      RunOptions::default(),
    );
    let err = orchestrator.run(&plan, "sha-other").unwrap_err();
    assert!(err.to_string().contains("sha-test"));
    assert!(err.to_string().contains("sha-other"));
  }

  #[test]
  fn test_pins_ephemeral_but_version_bumps_permanent() {
    let dir = TempDir::new().unwrap();
    let (packages, plan) = fixture(dir.path());

    let orchestrator = Orchestrator::new(
      dir.path(),
      packages.clone(),
      test_workspace(dir.path()),
      Arc::new(RecordingPublisher::new(&[])),
      registry_with_all(),
      RunOptions::default(),
    );
    orchestrator.run(&plan, "sha-test").unwrap();

    for package in &packages {
      let content = fs::read_to_string(&package.manifest_path).unwrap();
      // Own version bump survives the run
      assert!(content.contains("version = \"0.6.0\""), "{}: {}", package.name, content);
      // Exact pins do not
      assert!(!content.contains("=0.6.0"), "{}: {}", package.name, content);
      assert!(!crate::pin::backup_path(&package.manifest_path).exists());
    }

    // Dependents now reference the shipped version permanently
    let plugin = fs::read_to_string(&packages[1].manifest_path).unwrap();
    assert!(plugin.contains("path = \"../core\""), "{}", plugin);
    assert!(plugin.lines().any(|l| l.starts_with("core") && l.contains("version = \"0.6.0\"")), "{}", plugin);
  }

  #[test]
  fn test_verification_miss_is_a_failure() {
    let dir = TempDir::new().unwrap();
    let packages = vec![make_package(dir.path(), "core", "0.5.0", &[])];
    let versions = vec![PackageVersion {
      name: "core".to_string(),
      old_version: "0.5.0".to_string(),
      new_version: "0.6.0".to_string(),
      bump: VersionBump::Minor,
    }];
    let levels = PackageGraph::build(&packages).topo_levels().unwrap();
    let plan = build_plan(&versions, &levels, &[], &HashSet::new(), &HashSet::new(), "sha-test");

    // Registry never shows the version
    let orchestrator = Orchestrator::new(
      dir.path(),
      packages,
      test_workspace(dir.path()),
      Arc::new(RecordingPublisher::new(&[])),
      Arc::new(StaticRegistry::new()),
      RunOptions::default(),
    );
    let outcome = orchestrator.run(&plan, "sha-test").unwrap();
    assert_eq!(outcome.failed, vec!["core"]);

    let state = RunState::load(&state_path(dir.path())).unwrap();
    assert!(state.packages["core"].error.contains("not visible"));
  }

  #[test]
  fn test_concurrent_level_respects_worker_pool() {
    let dir = TempDir::new().unwrap();
    let packages: Vec<Package> = (0..6)
      .map(|i| make_package(dir.path(), &format!("leaf{}", i), "0.1.0", &[]))
      .collect();
    let versions: Vec<PackageVersion> = packages
      .iter()
      .map(|p| PackageVersion {
        name: p.name.clone(),
        old_version: p.version.clone(),
        new_version: "0.1.1".to_string(),
        bump: VersionBump::Patch,
      })
      .collect();
    let levels = PackageGraph::build(&packages).topo_levels().unwrap();
    assert_eq!(levels.len(), 1);
    let plan = build_plan(&versions, &levels, &[], &HashSet::new(), &HashSet::new(), "sha-test");

    let mut registry = StaticRegistry::new();
    for package in &packages {
      registry.mark_published(&package.name, "0.1.1");
    }
    let publisher = Arc::new(RecordingPublisher::new(&[]));
    let orchestrator = Orchestrator::new(
      dir.path(),
      packages,
      test_workspace(dir.path()),
      publisher.clone(),
      Arc::new(registry),
      RunOptions {
        concurrency: 3,
        ..RunOptions::default()
      },
    );
    let outcome = orchestrator.run(&plan, "sha-test").unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.published.len(), 6);
    assert_eq!(publisher.calls().len(), 6);
  }
}
