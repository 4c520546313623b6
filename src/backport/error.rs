//! Errors from a backport attempt.

use thiserror::Error;

use crate::git::{ConflictAnnotation, GitError};
use crate::github::GitHubApiError;
use crate::queue::JobPanicked;
use crate::state::{StateError, TransitionError};

#[derive(Debug, Error)]
pub enum BackportError {
    /// The source PR has no commits.
    #[error("no commits to backport")]
    NoCommits,

    /// The source PR has too many commits to replay automatically.
    #[error("too many commits to backport automatically ({count})")]
    CommitLimitExceeded { count: usize },

    /// Neither the per-commit patches nor the squash patch applied.
    #[error("patches did not apply cleanly ({} conflicting regions)", annotations.len())]
    PatchApplyConflict { annotations: Vec<ConflictAnnotation> },

    /// The target branch does not exist upstream.
    #[error("branch not found: {branch}")]
    BranchNotFound { branch: String },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    GitHub(#[from] GitHubApiError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Panicked(#[from] JobPanicked),
}

impl BackportError {
    /// True for failures the PR author can act on. These get a dedicated
    /// explanation on the PR; everything else is reported as an internal
    /// error.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            BackportError::NoCommits
                | BackportError::CommitLimitExceeded { .. }
                | BackportError::PatchApplyConflict { .. }
                | BackportError::BranchNotFound { .. }
        )
    }
}

impl From<StateError> for BackportError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::GitHub(e) => BackportError::GitHub(e),
            StateError::Transition(e) => BackportError::Transition(e),
        }
    }
}
