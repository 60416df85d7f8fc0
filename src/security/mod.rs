//! Security module
//!
//! Validation gates applied to tool-call arguments before any side effect:
//! - Path sandbox (allowed base directories, traversal rejection)
//! - Shell command policy (dangerous patterns, read-only verb allow-list)
//! - URL policy (scheme and private-host rejection)

pub mod commands;
pub mod paths;
pub mod urls;

pub use commands::validate_command;
pub use paths::PathPolicy;
pub use urls::validate_url;
