//! Configuration for convoy
//! Searched in order: convoy.toml, .convoy.toml, .config/convoy.toml
//!
//! Every field is optional; a missing file yields the defaults. The exclude
//! list and concurrency bound feed straight into plan building and the
//! orchestrator's worker pool.

use crate::core::error::{ConfigError, ConvoyError, ConvoyResult, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default intra-level concurrency (packages published in parallel)
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Default stale-lock timeout in seconds (one hour)
pub const DEFAULT_STALE_LOCK_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConvoyConfig {
  /// Package names excluded from publishing (plan status EXCLUDED)
  #[serde(default)]
  pub exclude: Vec<String>,

  /// How many packages within one level may publish concurrently
  #[serde(default = "default_concurrency")]
  pub concurrency: usize,

  /// Age after which a lock from another host may be reclaimed (seconds)
  #[serde(default = "default_stale_lock_timeout")]
  pub stale_lock_timeout_secs: u64,

  /// Seconds to wait between publishes within a level (registry propagation)
  #[serde(default)]
  pub publish_delay_secs: u64,

  /// Path to an externally-computed versions file (JSON), relative to root
  #[serde(default)]
  pub versions_file: Option<PathBuf>,
}

fn default_concurrency() -> usize {
  DEFAULT_CONCURRENCY
}

fn default_stale_lock_timeout() -> u64 {
  DEFAULT_STALE_LOCK_TIMEOUT_SECS
}

impl ConvoyConfig {
  /// Candidate config paths under a workspace root, in search order
  fn candidates(root: &Path) -> Vec<PathBuf> {
    vec![
      root.join("convoy.toml"),
      root.join(".convoy.toml"),
      root.join(".config").join("convoy.toml"),
    ]
  }

  /// Load configuration, falling back to defaults if no file exists
  pub fn load_or_default(root: &Path) -> ConvoyResult<Self> {
    for path in Self::candidates(root) {
      if path.exists() {
        return Self::load_file(&path);
      }
    }
    Ok(Self::default())
  }

  /// Load configuration, failing if no file exists
  pub fn load(root: &Path) -> ConvoyResult<Self> {
    for path in Self::candidates(root) {
      if path.exists() {
        return Self::load_file(&path);
      }
    }
    Err(ConvoyError::Config(ConfigError::NotFound {
      workspace_root: root.to_path_buf(),
    }))
  }

  fn load_file(path: &Path) -> ConvoyResult<Self> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ConvoyConfig = toml_edit::de::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  /// Validate configuration values
  pub fn validate(&self) -> ConvoyResult<()> {
    if self.concurrency == 0 {
      return Err(ConvoyError::Config(ConfigError::Invalid {
        field: "concurrency".to_string(),
        reason: "must be at least 1".to_string(),
      }));
    }
    if self.concurrency > 32 {
      return Err(ConvoyError::Config(ConfigError::Invalid {
        field: "concurrency".to_string(),
        reason: format!("{} is unreasonably high (max 32)", self.concurrency),
      }));
    }
    Ok(())
  }
}
