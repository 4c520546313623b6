//! Effects-as-data for GitHub operations.
//!
//! The backport runner and state machine describe the GitHub calls they need
//! as [`GitHubEffect`] values and hand them to a [`GitHubInterpreter`]. This
//! enables:
//! - Testability via scripted interpreters
//! - Logging/tracing of intended operations
//! - One place for retry and error classification

pub mod github;
pub mod interpreter;

pub use github::{
    AnnotationLevel, BranchData, CheckAnnotation, CheckConclusion, CheckRunData, CheckRunOutput,
    CheckRunStatus, CommentData, CommitData, GitHubEffect, GitHubResponse,
};
pub use interpreter::GitHubInterpreter;
