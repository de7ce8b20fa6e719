//! Error types for convoy with contextual messages and exit codes
//!
//! Errors are categorized so the CLI can attach the right operator guidance:
//! configuration and graph problems abort before any mutation, state errors
//! carry the "delete the state file and restart" remedy, and lock contention
//! is surfaced as a recoverable condition rather than overridden.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::lock::LockInfo;

/// Exit codes for convoy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
  /// User error (config, invalid args, unresolvable state)
  User = 1,
  /// System error (git, subprocess, I/O)
  System = 2,
  /// Contention (another run holds the workspace lock)
  Contention = 3,
}

impl ExitCode {
  /// Convert to i32 for process exit
  pub fn as_i32(self) -> i32 {
    self as i32
  }
}

/// Main error type for convoy
#[derive(Debug)]
pub enum ConvoyError {
  /// Configuration errors
  Config(ConfigError),

  /// Dependency graph errors
  Graph(GraphError),

  /// Persisted run-state errors
  State(StateError),

  /// Workspace lock errors
  Lock(LockError),

  /// I/O errors
  Io(io::Error),

  /// Generic error with message and optional context
  Message {
    message: String,
    context: Option<String>,
    help: Option<String>,
  },
}

impl ConvoyError {
  /// Create a simple error message
  pub fn message(msg: impl Into<String>) -> Self {
    ConvoyError::Message {
      message: msg.into(),
      context: None,
      help: None,
    }
  }

  /// Create an error with help text
  pub fn with_help(msg: impl Into<String>, help: impl Into<String>) -> Self {
    ConvoyError::Message {
      message: msg.into(),
      context: None,
      help: Some(help.into()),
    }
  }

  /// Add context to an existing error
  pub fn context(self, ctx: impl Into<String>) -> Self {
    let ctx_str = ctx.into();
    match self {
      ConvoyError::Message { message, context, help } => ConvoyError::Message {
        message,
        context: Some(context.map(|c| format!("{}\n{}", ctx_str, c)).unwrap_or(ctx_str)),
        help,
      },
      _ => self,
    }
  }

  /// Get the appropriate exit code for this error
  pub fn exit_code(&self) -> ExitCode {
    match self {
      ConvoyError::Config(_) => ExitCode::User,
      ConvoyError::Graph(_) => ExitCode::User,
      ConvoyError::State(_) => ExitCode::User,
      ConvoyError::Lock(_) => ExitCode::Contention,
      ConvoyError::Io(_) => ExitCode::System,
      ConvoyError::Message { .. } => ExitCode::User,
    }
  }

  /// Get contextual help message for this error
  pub fn help_message(&self) -> Option<String> {
    match self {
      ConvoyError::Config(e) => e.help_message(),
      ConvoyError::Graph(e) => e.help_message(),
      ConvoyError::State(e) => e.help_message(),
      ConvoyError::Lock(e) => e.help_message(),
      ConvoyError::Message { help, .. } => help.clone(),
      _ => None,
    }
  }
}

impl fmt::Display for ConvoyError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConvoyError::Config(e) => write!(f, "{}", e),
      ConvoyError::Graph(e) => write!(f, "{}", e),
      ConvoyError::State(e) => write!(f, "{}", e),
      ConvoyError::Lock(e) => write!(f, "{}", e),
      ConvoyError::Io(e) => write!(f, "I/O error: {}", e),
      ConvoyError::Message { message, context, .. } => {
        write!(f, "{}", message)?;
        if let Some(ctx) = context {
          write!(f, "\n{}", ctx)?;
        }
        Ok(())
      }
    }
  }
}

impl std::error::Error for ConvoyError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      ConvoyError::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for ConvoyError {
  fn from(err: io::Error) -> Self {
    ConvoyError::Io(err)
  }
}

impl From<String> for ConvoyError {
  fn from(msg: String) -> Self {
    ConvoyError::message(msg)
  }
}

impl From<&str> for ConvoyError {
  fn from(msg: &str) -> Self {
    ConvoyError::message(msg)
  }
}

impl From<toml_edit::TomlError> for ConvoyError {
  fn from(err: toml_edit::TomlError) -> Self {
    ConvoyError::message(format!("TOML parse error: {}", err))
  }
}

impl From<toml_edit::de::Error> for ConvoyError {
  fn from(err: toml_edit::de::Error) -> Self {
    ConvoyError::message(format!("TOML deserialization error: {}", err))
  }
}

impl From<serde_json::Error> for ConvoyError {
  fn from(err: serde_json::Error) -> Self {
    ConvoyError::message(format!("JSON error: {}", err))
  }
}

impl From<semver::Error> for ConvoyError {
  fn from(err: semver::Error) -> Self {
    ConvoyError::message(format!("Version parse error: {}", err))
  }
}

impl From<std::string::FromUtf8Error> for ConvoyError {
  fn from(err: std::string::FromUtf8Error) -> Self {
    ConvoyError::message(format!("UTF-8 conversion error: {}", err))
  }
}

impl From<ConfigError> for ConvoyError {
  fn from(err: ConfigError) -> Self {
    ConvoyError::Config(err)
  }
}

impl From<GraphError> for ConvoyError {
  fn from(err: GraphError) -> Self {
    ConvoyError::Graph(err)
  }
}

impl From<StateError> for ConvoyError {
  fn from(err: StateError) -> Self {
    ConvoyError::State(err)
  }
}

impl From<LockError> for ConvoyError {
  fn from(err: LockError) -> Self {
    ConvoyError::Lock(err)
  }
}

/// Convert anyhow::Error (used by subprocess helpers) to ConvoyError
impl From<anyhow::Error> for ConvoyError {
  fn from(err: anyhow::Error) -> Self {
    ConvoyError::message(err.to_string())
  }
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
  /// convoy.toml not found where one was required
  NotFound { workspace_root: PathBuf },

  /// A field failed validation
  Invalid { field: String, reason: String },
}

impl ConfigError {
  fn help_message(&self) -> Option<String> {
    match self {
      ConfigError::NotFound { .. } => {
        Some("Create a convoy.toml at the workspace root (all fields are optional).".to_string())
      }
      ConfigError::Invalid { field, .. } => Some(format!("Fix the `{}` entry in convoy.toml and re-run.", field)),
    }
  }
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::NotFound { workspace_root } => {
        write!(
          f,
          "No convoy configuration found.\nSearched under: {}",
          workspace_root.display()
        )
      }
      ConfigError::Invalid { field, reason } => {
        write!(f, "Invalid config field `{}`: {}", field, reason)
      }
    }
  }
}

/// Dependency graph errors
#[derive(Debug)]
pub enum GraphError {
  /// Internal dependencies form a cycle; no ordering exists
  Cycle { members: Vec<String> },
}

impl GraphError {
  fn help_message(&self) -> Option<String> {
    match self {
      GraphError::Cycle { .. } => {
        Some("Break the dependency cycle between these packages before releasing.".to_string())
      }
    }
  }
}

impl fmt::Display for GraphError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphError::Cycle { members } => {
        write!(f, "Dependency cycle detected among packages: {}", members.join(" → "))
      }
    }
  }
}

/// Persisted run-state errors
#[derive(Debug)]
pub enum StateError {
  /// Resume attempted against a different commit than the run was anchored to
  ShaMismatch { run_sha: String, current_sha: String },

  /// The state file exists but is malformed or missing required fields
  Corrupted { path: PathBuf, reason: String },
}

impl StateError {
  fn help_message(&self) -> Option<String> {
    match self {
      StateError::ShaMismatch { .. } => Some(
        "The workspace moved since this run started. Delete the state file \
         (.convoy/release-state.json) and start a fresh release, or check out the original commit."
          .to_string(),
      ),
      StateError::Corrupted { path, .. } => Some(format!(
        "Delete the state file ({}) and restart the release.",
        path.display()
      )),
    }
  }
}

impl fmt::Display for StateError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StateError::ShaMismatch { run_sha, current_sha } => {
        write!(
          f,
          "Run state was created at commit {} but the workspace is now at {}",
          run_sha, current_sha
        )
      }
      StateError::Corrupted { path, reason } => {
        write!(f, "Corrupted run state at {}: {}", path.display(), reason)
      }
    }
  }
}

/// Workspace lock errors
#[derive(Debug)]
pub enum LockError {
  /// A live lock is held by another process
  Held { path: PathBuf, info: LockInfo },
}

impl LockError {
  fn help_message(&self) -> Option<String> {
    match self {
      LockError::Held { .. } => Some(
        "Another release run is active in this workspace. Wait for it to finish, \
         or run `convoy unlock` if you are sure it is gone."
          .to_string(),
      ),
    }
  }
}

impl fmt::Display for LockError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LockError::Held { path, info } => {
        write!(
          f,
          "Workspace is locked by another release run ({})\nLock file: {}",
          info.display_summary(),
          path.display()
        )
      }
    }
  }
}

/// Result type alias for convoy
pub type ConvoyResult<T> = Result<T, ConvoyError>;

/// Helper trait to add context to Results
pub trait ResultExt<T> {
  /// Add context to an error result
  fn context(self, ctx: impl Into<String>) -> ConvoyResult<T>;

  /// Add context using a closure (lazy evaluation)
  fn with_context<F>(self, f: F) -> ConvoyResult<T>
  where
    F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
  E: Into<ConvoyError>,
{
  fn context(self, ctx: impl Into<String>) -> ConvoyResult<T> {
    self.map_err(|e| e.into().context(ctx))
  }

  fn with_context<F>(self, f: F) -> ConvoyResult<T>
  where
    F: FnOnce() -> String,
  {
    self.map_err(|e| e.into().context(f()))
  }
}

/// Pretty-print an error to stderr with help text
pub fn print_error(error: &ConvoyError) {
  eprintln!("\n❌ {}\n", error);

  if let Some(help) = error.help_message() {
    eprintln!("💡 Help: {}\n", help);
  }
}
