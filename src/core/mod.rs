//! Core building blocks for convoy
//!
//! - **config**: convoy configuration (convoy.toml) parsing and validation
//! - **error**: categorized error types with contextual help messages

pub mod config;
pub mod error;
