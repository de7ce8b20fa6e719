//! Version-control boundary
//!
//! The engine needs exactly two facts from the VCS: the commit the workspace
//! currently sits on (to anchor and validate run state) and whether a release
//! tag already exists (to seed the already-published set).

pub mod system_git;

pub use system_git::SystemGit;

use crate::core::error::ConvoyResult;

pub trait Vcs {
  /// SHA of the commit the working tree is currently at
  fn current_sha(&self) -> ConvoyResult<String>;

  /// Whether a tag with this exact name exists
  fn tag_exists(&self, name: &str) -> ConvoyResult<bool>;
}
