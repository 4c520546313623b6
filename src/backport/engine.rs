//! Two-tier patch application.
//!
//! The engine first replays the source PR's commits one patch at a time onto a
//! fresh branch cut from the target. If any patch fails and the PR was merged,
//! it starts over from the same base and applies the single squash commit
//! instead. When both strategies fail, the conflict markers left in the
//! working copy are turned into annotations.

use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::effects::GitHubInterpreter;
use crate::git::patch::{ApplyResult, abort_patch, apply_patch, checkout_new_branch, fetch_branch, push_branch};
use crate::git::{CommitIdentity, GitError, WorkingCopy, diff_conflicts, rev_parse};
use crate::github::{GitHubApiError, GitHubOps};
use crate::types::Sha;

use super::error::BackportError;

/// Where patch text comes from.
pub trait PatchSource {
    /// Mailbox-format patch for the commit `sha`.
    fn commit_patch(&self, sha: &Sha) -> impl Future<Output = Result<String, BackportError>> + Send;
}

impl<G> PatchSource for GitHubOps<'_, G>
where
    G: GitHubInterpreter<Error = GitHubApiError> + Sync,
{
    async fn commit_patch(&self, sha: &Sha) -> Result<String, BackportError> {
        Ok(GitHubOps::commit_patch(self, sha).await?)
    }
}

/// What to backport and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackportRequest {
    /// Branch the backport is based on.
    pub target_branch: String,
    /// Branch the patches are committed to.
    pub temp_branch: String,
    /// Commits of the source PR, oldest first.
    pub commits: Vec<Sha>,
    /// Squash commit of the merged source PR; enables the fallback strategy.
    pub squash_commit: Option<Sha>,
    /// Push `temp_branch` upstream on success.
    pub push: bool,
}

/// Which strategy produced the branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackportStrategy {
    /// Every commit was replayed individually.
    Commits,
    /// The squash commit was applied as one patch.
    Squash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedBackport {
    pub strategy: BackportStrategy,
    pub pushed: bool,
    /// Tip of the backport branch.
    pub head: Sha,
}

/// Applies a PR's patches onto a target branch.
#[derive(Debug, Clone)]
pub struct PatchBackportEngine {
    identity: CommitIdentity,
    commit_limit: usize,
}

impl PatchBackportEngine {
    pub fn new(identity: CommitIdentity, commit_limit: usize) -> Self {
        PatchBackportEngine {
            identity,
            commit_limit,
        }
    }

    pub fn commit_limit(&self) -> usize {
        self.commit_limit
    }

    /// Rejects PRs with no commits or with `commit_limit` commits or more.
    pub fn check_commit_count(&self, count: usize) -> Result<(), BackportError> {
        if count == 0 {
            return Err(BackportError::NoCommits);
        }
        if count >= self.commit_limit {
            return Err(BackportError::CommitLimitExceeded { count });
        }
        Ok(())
    }

    /// Builds `request.temp_branch` in `working_copy`.
    ///
    /// The commit count is checked before any git work. On conflict the
    /// working copy is left mid-`am` so it can be inspected; it is discarded
    /// with the [`WorkingCopy`] anyway.
    #[instrument(
        skip_all,
        fields(
            repo = %working_copy.slug(),
            target = %request.target_branch,
            branch = %request.temp_branch,
        )
    )]
    pub async fn backport<P>(
        &self,
        working_copy: &WorkingCopy,
        request: &BackportRequest,
        patches: &P,
    ) -> Result<AppliedBackport, BackportError>
    where
        P: PatchSource + Sync,
    {
        self.check_commit_count(request.commits.len())?;

        let workdir = working_copy.path();
        match fetch_branch(workdir, &request.target_branch).await {
            Err(GitError::RefNotFound { .. }) => {
                return Err(BackportError::BranchNotFound {
                    branch: request.target_branch.clone(),
                });
            }
            result => result?,
        }
        let base = format!("origin/{}", request.target_branch);
        checkout_new_branch(workdir, &request.temp_branch, &base).await?;

        let strategy = match self.apply_commits(workdir, &request.commits, patches).await? {
            None => BackportStrategy::Commits,
            Some(_) => {
                let Some(squash) = &request.squash_commit else {
                    return Err(conflict(workdir).await);
                };
                info!(squash = %squash.short(), "Falling back to the squash commit");
                abort_patch(workdir).await?;
                checkout_new_branch(workdir, &request.temp_branch, &base).await?;

                let patch = patches.commit_patch(squash).await?;
                match apply_patch(workdir, &self.identity, &patch).await? {
                    ApplyResult::Applied => BackportStrategy::Squash,
                    ApplyResult::Conflict { .. } => {
                        warn!(squash = %squash.short(), "Squash patch did not apply");
                        return Err(conflict(workdir).await);
                    }
                }
            }
        };

        let head = rev_parse(workdir, "HEAD").await?;
        if request.push {
            push_branch(workdir, &request.temp_branch).await?;
        }
        info!(?strategy, head = %head.short(), pushed = request.push, "Backport branch ready");

        Ok(AppliedBackport {
            strategy,
            pushed: request.push,
            head,
        })
    }

    /// Replays `commits` in order. Returns the index of the first commit whose
    /// patch did not apply.
    async fn apply_commits<P>(
        &self,
        workdir: &Path,
        commits: &[Sha],
        patches: &P,
    ) -> Result<Option<usize>, BackportError>
    where
        P: PatchSource + Sync,
    {
        for (index, sha) in commits.iter().enumerate() {
            let patch = patches.commit_patch(sha).await?;
            match apply_patch(workdir, &self.identity, &patch).await? {
                ApplyResult::Applied => debug!(commit = %sha.short(), "Applied patch"),
                ApplyResult::Conflict { .. } => {
                    warn!(
                        commit = %sha.short(),
                        index = index + 1,
                        total = commits.len(),
                        "Patch did not apply"
                    );
                    return Ok(Some(index));
                }
            }
        }
        Ok(None)
    }
}

/// Collects conflict annotations into a [`BackportError::PatchApplyConflict`].
///
/// Failing to read the diagnostics is still a conflict, just without
/// annotations.
async fn conflict(workdir: &Path) -> BackportError {
    let annotations = match diff_conflicts(workdir).await {
        Ok(annotations) => annotations,
        Err(e) => {
            warn!(error = %e, "Failed to collect conflict annotations");
            Vec::new()
        }
    };
    BackportError::PatchApplyConflict { annotations }
}
