//! Typed wrappers over [`GitHubInterpreter`].
//!
//! Each method issues one effect and unpacks the matching response variant.
//! A mismatched variant means the interpreter is broken and is reported as a
//! permanent error.

use crate::effects::{
    BranchData, CheckConclusion, CheckRunData, CheckRunOutput, CheckRunStatus, CommentData,
    CommitData, GitHubEffect, GitHubInterpreter, GitHubResponse,
};
use crate::types::{CheckRunId, CommentId, PrNumber, PullRequest, Sha};

use super::error::GitHubApiError;

/// Borrowing view of an interpreter with one method per effect.
#[derive(Debug)]
pub struct GitHubOps<'a, G> {
    github: &'a G,
}

impl<G> Clone for GitHubOps<'_, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G> Copy for GitHubOps<'_, G> {}

fn unexpected(effect: &str, response: GitHubResponse) -> GitHubApiError {
    GitHubApiError::permanent_without_source(format!(
        "unexpected response to {effect}: {response:?}"
    ))
}

impl<'a, G> GitHubOps<'a, G>
where
    G: GitHubInterpreter<Error = GitHubApiError> + Sync,
{
    pub fn new(github: &'a G) -> Self {
        Self { github }
    }

    pub async fn pull_request(&self, pr: PrNumber) -> Result<PullRequest, GitHubApiError> {
        match self.github.interpret(GitHubEffect::GetPr { pr }).await? {
            GitHubResponse::Pr(pull) => Ok(pull),
            other => Err(unexpected("GetPr", other)),
        }
    }

    pub async fn pr_commits(&self, pr: PrNumber) -> Result<Vec<CommitData>, GitHubApiError> {
        match self.github.interpret(GitHubEffect::ListPrCommits { pr }).await? {
            GitHubResponse::Commits(commits) => Ok(commits),
            other => Err(unexpected("ListPrCommits", other)),
        }
    }

    pub async fn commit_patch(&self, sha: &Sha) -> Result<String, GitHubApiError> {
        let effect = GitHubEffect::GetCommitPatch { sha: sha.clone() };
        match self.github.interpret(effect).await? {
            GitHubResponse::Patch(patch) => Ok(patch),
            other => Err(unexpected("GetCommitPatch", other)),
        }
    }

    pub async fn create_pr(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
        head: impl Into<String>,
        base: impl Into<String>,
    ) -> Result<PrNumber, GitHubApiError> {
        let effect = GitHubEffect::CreatePr {
            title: title.into(),
            body: body.into(),
            head: head.into(),
            base: base.into(),
        };
        match self.github.interpret(effect).await? {
            GitHubResponse::PrCreated { number } => Ok(number),
            other => Err(unexpected("CreatePr", other)),
        }
    }

    pub async fn request_reviewers(
        &self,
        pr: PrNumber,
        reviewers: Vec<String>,
    ) -> Result<(), GitHubApiError> {
        let effect = GitHubEffect::RequestReviewers { pr, reviewers };
        match self.github.interpret(effect).await? {
            GitHubResponse::ReviewersRequested => Ok(()),
            other => Err(unexpected("RequestReviewers", other)),
        }
    }

    pub async fn post_comment(
        &self,
        pr: PrNumber,
        body: impl Into<String>,
    ) -> Result<CommentId, GitHubApiError> {
        let effect = GitHubEffect::PostComment {
            pr,
            body: body.into(),
        };
        match self.github.interpret(effect).await? {
            GitHubResponse::CommentPosted { id } => Ok(id),
            other => Err(unexpected("PostComment", other)),
        }
    }

    pub async fn comments(&self, pr: PrNumber) -> Result<Vec<CommentData>, GitHubApiError> {
        match self.github.interpret(GitHubEffect::ListComments { pr }).await? {
            GitHubResponse::Comments(comments) => Ok(comments),
            other => Err(unexpected("ListComments", other)),
        }
    }

    pub async fn add_labels(&self, pr: PrNumber, labels: Vec<String>) -> Result<(), GitHubApiError> {
        match self.github.interpret(GitHubEffect::AddLabels { pr, labels }).await? {
            GitHubResponse::LabelsAdded => Ok(()),
            other => Err(unexpected("AddLabels", other)),
        }
    }

    /// Returns false if the PR did not carry the label.
    pub async fn remove_label(
        &self,
        pr: PrNumber,
        label: impl Into<String>,
    ) -> Result<bool, GitHubApiError> {
        let effect = GitHubEffect::RemoveLabel {
            pr,
            label: label.into(),
        };
        match self.github.interpret(effect).await? {
            GitHubResponse::LabelRemoved { was_present } => Ok(was_present),
            other => Err(unexpected("RemoveLabel", other)),
        }
    }

    pub async fn labels(&self, pr: PrNumber) -> Result<Vec<String>, GitHubApiError> {
        match self.github.interpret(GitHubEffect::ListLabels { pr }).await? {
            GitHubResponse::Labels(labels) => Ok(labels),
            other => Err(unexpected("ListLabels", other)),
        }
    }

    pub async fn create_check_run(
        &self,
        name: impl Into<String>,
        head_sha: &Sha,
        status: CheckRunStatus,
    ) -> Result<CheckRunId, GitHubApiError> {
        let effect = GitHubEffect::CreateCheckRun {
            name: name.into(),
            head_sha: head_sha.clone(),
            status,
        };
        match self.github.interpret(effect).await? {
            GitHubResponse::CheckRunCreated { id } => Ok(id),
            other => Err(unexpected("CreateCheckRun", other)),
        }
    }

    pub async fn check_runs(
        &self,
        head_sha: &Sha,
        name: impl Into<String>,
    ) -> Result<Vec<CheckRunData>, GitHubApiError> {
        let effect = GitHubEffect::ListCheckRuns {
            head_sha: head_sha.clone(),
            name: name.into(),
        };
        match self.github.interpret(effect).await? {
            GitHubResponse::CheckRuns(runs) => Ok(runs),
            other => Err(unexpected("ListCheckRuns", other)),
        }
    }

    pub async fn update_check_run(
        &self,
        id: CheckRunId,
        status: CheckRunStatus,
        conclusion: Option<CheckConclusion>,
        output: Option<CheckRunOutput>,
    ) -> Result<(), GitHubApiError> {
        let effect = GitHubEffect::UpdateCheckRun {
            id,
            status,
            conclusion,
            output,
        };
        match self.github.interpret(effect).await? {
            GitHubResponse::CheckRunUpdated => Ok(()),
            other => Err(unexpected("UpdateCheckRun", other)),
        }
    }

    pub async fn branches(&self) -> Result<Vec<String>, GitHubApiError> {
        match self.github.interpret(GitHubEffect::ListBranches).await? {
            GitHubResponse::Branches(branches) => Ok(branches),
            other => Err(unexpected("ListBranches", other)),
        }
    }

    /// Returns `None` if the branch does not exist.
    pub async fn branch(&self, branch: impl Into<String>) -> Result<Option<BranchData>, GitHubApiError> {
        let effect = GitHubEffect::GetBranch {
            branch: branch.into(),
        };
        match self.github.interpret(effect).await? {
            GitHubResponse::Branch(found) => Ok(found),
            other => Err(unexpected("GetBranch", other)),
        }
    }

    /// Permission level of `user`: `admin`, `maintain`, `write`, `triage`,
    /// `read` or `none`.
    pub async fn permission(&self, user: impl Into<String>) -> Result<String, GitHubApiError> {
        let effect = GitHubEffect::GetCollaboratorPermission { user: user.into() };
        match self.github.interpret(effect).await? {
            GitHubResponse::Permission(permission) => Ok(permission),
            other => Err(unexpected("GetCollaboratorPermission", other)),
        }
    }
}
