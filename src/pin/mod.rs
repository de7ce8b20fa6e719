//! Ephemeral pinning of internal dependency versions
//!
//! An isolated build step needs a package's workspace-relative dependency
//! references replaced with the exact versions being released. That mutation
//! must be invisible afterward: the manifest's bytes are restored and
//! hash-verified on every exit path, including process termination.
//!
//! Three independent triggers share one restore-and-verify action, gated on
//! a process-global session registry so none of them fires twice:
//! - the scope guard's `Drop` (runs on normal return and on unwind),
//! - a process-exit hook (`libc::atexit`),
//! - signal handlers for INT/TERM/HUP that restore and then re-raise the
//!   signal through the default disposition, so supervision still sees the
//!   process die from the original signal.
//!
//! A restore whose recomputed digest does not match the pre-mutation digest
//! is logged as an error and nothing more; at that point the process may be
//! mid-termination and visibility beats failure.

use crate::core::error::{ConvoyResult, ResultExt};
use crate::workspace::normalize_name;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use toml_edit::DocumentMut;

/// Dependency tables eligible for pinning in a Cargo manifest
const PIN_TABLES: [&str; 3] = ["dependencies", "dev-dependencies", "build-dependencies"];

type Sha256Digest = [u8; 32];

/// Everything a trigger needs to undo one session
struct RestorePoint {
  id: u64,
  manifest: PathBuf,
  backup: PathBuf,
  digest: Sha256Digest,
}

static REGISTRY: Mutex<Vec<RestorePoint>> = Mutex::new(Vec::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn registry() -> std::sync::MutexGuard<'static, Vec<RestorePoint>> {
  REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Backup sits next to the manifest with the extension swapped out
pub fn backup_path(manifest: &Path) -> PathBuf {
  manifest.with_extension("bak")
}

fn file_digest(path: &Path) -> ConvoyResult<Sha256Digest> {
  let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  Ok(hasher.finalize().into())
}

/// The shared restore-and-verify action: put the backup back, drop it, and
/// prove the manifest matches its pre-mutation digest.
fn restore_point(point: &RestorePoint) {
  if !point.backup.exists() {
    return;
  }
  if let Err(e) = fs::copy(&point.backup, &point.manifest) {
    tracing::error!(
      manifest = %point.manifest.display(),
      error = %e,
      "failed to restore manifest from backup"
    );
    return;
  }
  let _ = fs::remove_file(&point.backup);

  match file_digest(&point.manifest) {
    Ok(digest) if digest == point.digest => {}
    Ok(_) => {
      tracing::error!(
        manifest = %point.manifest.display(),
        "manifest restore verification failed: content differs from pre-mutation digest"
      );
    }
    Err(e) => {
      tracing::error!(manifest = %point.manifest.display(), error = %e, "could not verify restored manifest");
    }
  }
}

/// Restore every still-registered session. Used by the process-exit hook
/// and the signal handlers; a `Drop` that already ran has removed its
/// session, so nothing restores twice.
pub(crate) fn restore_pending() {
  let points = {
    match REGISTRY.try_lock() {
      Ok(mut guard) => std::mem::take(&mut *guard),
      Err(std::sync::TryLockError::Poisoned(e)) => std::mem::take(&mut *e.into_inner()),
      Err(std::sync::TryLockError::WouldBlock) => return,
    }
  };
  for point in &points {
    restore_point(point);
  }
}

#[cfg(unix)]
mod hooks {
  use super::restore_pending;
  use std::sync::Mutex;

  const SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP];

  static SAVED: Mutex<Option<Vec<(libc::c_int, libc::sigaction)>>> = Mutex::new(None);
  static ATEXIT: std::sync::Once = std::sync::Once::new();

  extern "C" fn on_exit() {
    restore_pending();
  }

  extern "C" fn on_signal(sig: libc::c_int) {
    restore_pending();
    unsafe {
      let mut dfl: libc::sigaction = std::mem::zeroed();
      dfl.sa_sigaction = libc::SIG_DFL;
      libc::sigemptyset(&mut dfl.sa_mask);
      libc::sigaction(sig, &dfl, std::ptr::null_mut());
      libc::raise(sig);
    }
  }

  /// Install the atexit hook (once per process) and the signal handlers
  /// (saving prior dispositions for reinstatement).
  pub(super) fn install() {
    ATEXIT.call_once(|| unsafe {
      libc::atexit(on_exit);
    });

    let mut saved = SAVED.lock().unwrap_or_else(|e| e.into_inner());
    if saved.is_some() {
      return;
    }
    let mut prior = Vec::with_capacity(SIGNALS.len());
    for sig in SIGNALS {
      unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        let mut old: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(sig, &action, &mut old) == 0 {
          prior.push((sig, old));
        }
      }
    }
    *saved = Some(prior);
  }

  /// Reinstate the dispositions that were active before the first pin
  pub(super) fn uninstall() {
    let mut saved = SAVED.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(prior) = saved.take() {
      for (sig, old) in prior {
        unsafe {
          libc::sigaction(sig, &old, std::ptr::null_mut());
        }
      }
    }
  }
}

#[cfg(not(unix))]
mod hooks {
  pub(super) fn install() {}
  pub(super) fn uninstall() {}
}

/// A scoped manifest mutation. Construct with [`EphemeralPin::apply`]; the
/// original bytes come back when the guard drops, whatever happens inside
/// the scope.
pub struct EphemeralPin {
  id: u64,
  manifest: PathBuf,
  pins_applied: usize,
  restored: bool,
}

impl EphemeralPin {
  /// Pin `manifest`'s dependencies to the exact versions in `pins`
  /// (package name → version, pre-normalization).
  ///
  /// Dependency entries whose normalized name is not in the map, and
  /// entries too malformed to rewrite safely, are left untouched.
  pub fn apply(manifest: &Path, pins: &BTreeMap<String, String>) -> ConvoyResult<Self> {
    let digest = file_digest(manifest)?;
    let backup = backup_path(manifest);
    fs::copy(manifest, &backup).with_context(|| format!("Failed to back up {}", manifest.display()))?;

    let pins_applied = match pin_dependencies(manifest, pins) {
      Ok(count) => count,
      Err(e) => {
        // The scope never opened; put things back before reporting
        let point = RestorePoint {
          id: 0,
          manifest: manifest.to_path_buf(),
          backup,
          digest,
        };
        restore_point(&point);
        return Err(e);
      }
    };

    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    hooks::install();
    registry().push(RestorePoint {
      id,
      manifest: manifest.to_path_buf(),
      backup,
      digest,
    });

    tracing::debug!(manifest = %manifest.display(), pins = pins_applied, "ephemeral pin applied");
    Ok(Self {
      id,
      manifest: manifest.to_path_buf(),
      pins_applied,
      restored: false,
    })
  }

  /// Number of dependency entries that were rewritten
  pub fn pins_applied(&self) -> usize {
    self.pins_applied
  }

  /// Explicit restore. Idempotent; also runs from `Drop`. Unregisters the
  /// session first so the exit/signal triggers cannot fire for it again,
  /// then reinstates prior signal dispositions if no pin remains active.
  pub fn restore(&mut self) {
    if self.restored {
      return;
    }
    self.restored = true;

    let point = {
      let mut reg = registry();
      let idx = reg.iter().position(|p| p.id == self.id);
      idx.map(|i| reg.remove(i))
    };
    if let Some(point) = point {
      restore_point(&point);
    }
    if registry().is_empty() {
      hooks::uninstall();
    }
  }
}

impl Drop for EphemeralPin {
  fn drop(&mut self) {
    self.restore();
  }
}

/// Rewrite matching dependency entries to exact `=version` pins.
///
/// The bare package name is the table key unless a `package` rename is
/// present. String entries are replaced wholesale; table entries get
/// `version` set and any `path` reference removed so the isolated build
/// resolves the registry artifact. Anything else is skipped.
fn pin_dependencies(manifest: &Path, pins: &BTreeMap<String, String>) -> ConvoyResult<usize> {
  let content = fs::read_to_string(manifest).with_context(|| format!("Failed to read {}", manifest.display()))?;
  let mut doc: DocumentMut = content.parse()?;

  let normalized: BTreeMap<String, &String> = pins.iter().map(|(k, v)| (normalize_name(k), v)).collect();

  let mut applied = 0;
  for table in PIN_TABLES {
    let Some(deps) = doc.get_mut(table).and_then(|t| t.as_table_like_mut()) else {
      continue;
    };
    let keys: Vec<String> = deps.iter().map(|(k, _)| k.to_string()).collect();
    for key in keys {
      let Some(item) = deps.get_mut(&key) else { continue };
      let real = item
        .get("package")
        .and_then(|p| p.as_str())
        .unwrap_or(&key)
        .to_string();
      let Some(version) = normalized.get(&normalize_name(&real)) else {
        continue;
      };
      let pinned = format!("={}", version);

      if item.is_str() {
        *item = toml_edit::value(pinned);
        applied += 1;
      } else if let Some(t) = item.as_table_like_mut() {
        t.insert("version", toml_edit::value(pinned));
        t.remove("path");
        applied += 1;
      }
      // Anything else (malformed specifier) stays as-is
    }
  }

  if applied > 0 {
    fs::write(manifest, doc.to_string()).with_context(|| format!("Failed to write {}", manifest.display()))?;
  }
  Ok(applied)
}

/// Hex digest of a file's current content, for verification in tests
#[allow(dead_code)]
pub fn digest_hex(path: &Path) -> ConvoyResult<String> {
  let digest = file_digest(path)?;
  Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

impl std::fmt::Debug for EphemeralPin {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EphemeralPin")
      .field("manifest", &self.manifest)
      .field("pins_applied", &self.pins_applied)
      .field("restored", &self.restored)
      .finish()
  }
}
