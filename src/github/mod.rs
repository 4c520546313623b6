//! GitHub API client and effect interpreter.
//!
//! This module executes GitHub effects via the octocrab library. It implements
//! the `GitHubInterpreter` trait defined in the effects module.
//!
//! Key features:
//! - Per-effect retry schedules for transient failures
//! - Distinguishes transient vs permanent errors
//! - Typed per-effect wrappers ([`GitHubOps`]) for callers

mod client;
mod error;
mod interpreter;
mod ops;
mod retry;

pub use client::OctocrabClient;
pub use error::{GitHubApiError, GitHubErrorKind};
pub use interpreter::{MAX_ANNOTATIONS_PER_REQUEST, interpret_github_effect};
pub use ops::GitHubOps;
pub use retry::RetryConfig;
