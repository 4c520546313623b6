//! Branch preparation, mailbox patch application and push.
//!
//! Patches are applied with `git am -3`, so a patch whose context no longer
//! matches falls back to a three-way merge using the blobs recorded in the
//! patch. When that also fails the working copy is left mid-`am` with conflict
//! markers in place, which is what [`super::conflicts::diff_conflicts`] reads.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{CommitIdentity, GitError, GitResult, check_output, git_command, git_commit_command, run_git};

/// Outcome of applying one patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// The patch was committed on top of HEAD.
    Applied,

    /// The patch did not apply; `am` is left in progress.
    Conflict {
        /// Output from `git am` describing the failure.
        details: String,
    },
}

impl ApplyResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyResult::Applied)
    }
}

/// Fetch `branch` from `origin`, updating `origin/<branch>`.
///
/// Returns [`GitError::RefNotFound`] if the remote has no such branch.
pub async fn fetch_branch(workdir: &Path, branch: &str) -> GitResult<()> {
    let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
    let args = ["fetch", "--quiet", "origin", refspec.as_str()];
    let output = git_command(workdir).args(args).output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("couldn't find remote ref") {
            return Err(GitError::RefNotFound {
                refspec: format!("refs/heads/{branch}"),
            });
        }
    }
    check_output(&args, output)?;
    Ok(())
}

/// Create or reset `branch` to `start_point` and check it out, discarding any
/// local changes.
pub async fn checkout_new_branch(workdir: &Path, branch: &str, start_point: &str) -> GitResult<()> {
    run_git(workdir, &["checkout", "--quiet", "--force", "-B", branch, start_point]).await?;
    Ok(())
}

/// Apply a mailbox-format patch with `git am -3`.
pub async fn apply_patch(
    workdir: &Path,
    identity: &CommitIdentity,
    patch: &str,
) -> GitResult<ApplyResult> {
    let mut child = git_commit_command(workdir, identity)
        .args(["am", "-3", "--keep-cr"])
        .stdin(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(patch.as_bytes()).await?;
        // Dropping stdin closes the pipe so `git am` sees EOF.
    }

    let output = child.wait_with_output().await?;
    if output.status.success() {
        return Ok(ApplyResult::Applied);
    }

    let details = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    debug!(details = %details.trim(), "git am failed");
    Ok(ApplyResult::Conflict { details })
}

/// Abandon an in-progress `git am`, restoring the pre-`am` HEAD.
///
/// Succeeds if no `am` is in progress.
pub async fn abort_patch(workdir: &Path) -> GitResult<()> {
    if workdir.join(".git").join("rebase-apply").exists() {
        run_git(workdir, &["am", "--abort"]).await?;
    }
    Ok(())
}

/// Push `branch` to `origin` and set it as the upstream.
pub async fn push_branch(workdir: &Path, branch: &str) -> GitResult<()> {
    run_git(workdir, &["push", "--quiet", "--set-upstream", "origin", branch]).await?;
    Ok(())
}
