//! Pull request types as seen by the backport engine.

use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, Sha};

/// The state of a pull request.
///
/// `Merged` carries the merge commit SHA: for a squash-merged PR this is the
/// single commit whose patch is used by the fallback strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PrState {
    Open,
    Merged { merge_commit_sha: Sha },
    Closed,
}

impl PrState {
    pub fn is_open(&self) -> bool {
        matches!(self, PrState::Open)
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, PrState::Merged { .. })
    }

    /// Returns the merge commit SHA if the PR was merged.
    pub fn merge_commit_sha(&self) -> Option<&Sha> {
        match self {
            PrState::Merged { merge_commit_sha } => Some(merge_commit_sha),
            _ => None,
        }
    }
}

/// Pull request data needed to drive a backport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: PrNumber,
    pub title: String,
    /// Body text; GitHub returns `null` for an empty body.
    pub body: Option<String>,
    /// Login of the PR author.
    pub author: String,
    pub head_sha: Sha,
    pub head_ref: String,
    pub base_ref: String,
    pub state: PrState,
    /// Label names currently on the PR.
    pub labels: Vec<String>,
}

impl PullRequest {
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}
