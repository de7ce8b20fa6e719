//! Registry availability boundary
//!
//! The engine asks registries one question: is this name+version already
//! out? Answers feed the plan's already-published set and the post-publish
//! verification step. The bundled [`TagRegistry`] treats the release tag as
//! the durable record of what has shipped; network-backed registries
//! implement the same trait.

use crate::core::error::ConvoyResult;
use crate::vcs::Vcs;
use std::collections::HashSet;
use std::sync::Arc;

pub trait Registry {
  /// Whether `name` at exactly `version` is already published
  fn check_published(&self, name: &str, version: &str) -> ConvoyResult<bool>;
}

/// Release tag name for a package version, e.g. `core-v0.6.0`
pub fn release_tag(name: &str, version: &str) -> String {
  format!("{}-v{}", name, version)
}

/// Registry backed by VCS release tags.
pub struct TagRegistry {
  vcs: Arc<dyn Vcs + Send + Sync>,
}

impl TagRegistry {
  pub fn new(vcs: Arc<dyn Vcs + Send + Sync>) -> Self {
    Self { vcs }
  }
}

impl Registry for TagRegistry {
  fn check_published(&self, name: &str, version: &str) -> ConvoyResult<bool> {
    self.vcs.tag_exists(&release_tag(name, version))
  }
}

/// Fixed-answer registry for tests and dry runs.
#[derive(Default)]
pub struct StaticRegistry {
  published: HashSet<(String, String)>,
}

#[allow(dead_code)] // Exercised by the conformance suite and orchestrator tests
impl StaticRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_published(mut self, name: &str, version: &str) -> Self {
    self.published.insert((name.to_string(), version.to_string()));
    self
  }

  pub fn mark_published(&mut self, name: &str, version: &str) {
    self.published.insert((name.to_string(), version.to_string()));
  }
}

impl Registry for StaticRegistry {
  fn check_published(&self, name: &str, version: &str) -> ConvoyResult<bool> {
    Ok(self.published.contains(&(name.to_string(), version.to_string())))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::error::ConvoyResult;

  /// Vcs stub answering tag queries from a fixed set
  struct MockVcs {
    tags: HashSet<String>,
  }

  impl Vcs for MockVcs {
    fn current_sha(&self) -> ConvoyResult<String> {
      Ok("0000000000000000000000000000000000000000".to_string())
    }

    fn tag_exists(&self, name: &str) -> ConvoyResult<bool> {
      Ok(self.tags.contains(name))
    }
  }

  /// Behavioral contract every Registry implementation must satisfy.
  /// The fixture is expected to have exactly core@0.5.0 published.
  fn exercise_registry(registry: &dyn Registry) {
    // Exact name+version matches
    assert!(registry.check_published("core", "0.5.0").unwrap());
    // A different version of the same package does not
    assert!(!registry.check_published("core", "0.6.0").unwrap());
    // Nor a different package at the same version
    assert!(!registry.check_published("plugin", "0.5.0").unwrap());
    // Queries are read-only: asking twice gives the same answer
    assert!(registry.check_published("core", "0.5.0").unwrap());
  }

  #[test]
  fn test_release_tag_format() {
    assert_eq!(release_tag("core", "0.6.0"), "core-v0.6.0");
  }

  #[test]
  fn test_static_registry_conformance() {
    let registry = StaticRegistry::new().with_published("core", "0.5.0");
    exercise_registry(&registry);
  }

  #[test]
  fn test_tag_registry_conformance() {
    let vcs = MockVcs {
      tags: [release_tag("core", "0.5.0")].into_iter().collect(),
    };
    let registry = TagRegistry::new(Arc::new(vcs));
    exercise_registry(&registry);
  }
}
