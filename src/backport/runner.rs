//! Backport jobs: from a (PR, branch, purpose) request to a backport PR or a
//! check run.
//!
//! [`BackportRunner::enqueue`] admits one job per head SHA, branch and purpose
//! into the [`ExecutionQueue`]. The job reads the PR, prepares a working copy,
//! runs the [`PatchBackportEngine`] and, for real backports, opens the PR and
//! moves the labels. Failures are reported by the job's continuation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::BackportConfig;
use crate::effects::{
    AnnotationLevel, CheckAnnotation, CheckConclusion, CheckRunOutput, CheckRunStatus,
    GitHubInterpreter,
};
use crate::git::{ConflictAnnotation, RepoCredentials, RepositoryCache};
use crate::github::{GitHubApiError, GitHubOps};
use crate::messages::{self, BACKPORT_LABEL};
use crate::queue::{Admission, ExecutionQueue, JobOutcome};
use crate::state::{BackportEvent, BackportStateMachine, TransitionError};
use crate::types::{CheckRunId, PrNumber, PullRequest, RepoSlug, Sha};

use super::engine::{BackportRequest, PatchBackportEngine};
use super::error::BackportError;

/// Permission levels allowed to request backports.
const WRITE_PERMISSIONS: [&str; 3] = ["admin", "maintain", "write"];

/// Longest title slug used in a temporary branch name.
const MAX_TITLE_SLUG_LEN: usize = 32;

/// Why a backport job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackportPurpose {
    /// Push the branch, open the backport PR and advance labels.
    Execute,
    /// Dry run reported through a check run on the original PR.
    Check,
}

impl fmt::Display for BackportPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackportPurpose::Execute => f.write_str("execute"),
            BackportPurpose::Check => f.write_str("check"),
        }
    }
}

/// Deduplication key of a job.
pub fn job_identifier(head_sha: &Sha, branch: &str, purpose: BackportPurpose) -> String {
    format!("{head_sha}-{branch}-{purpose}")
}

/// Name of the branch a backport is built on:
/// `<target>-bp-<title slug>-<millis>`.
pub fn temp_branch_name(target: &str, title: &str, millis: i64) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= MAX_TITLE_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        format!("{target}-bp-{millis}")
    } else {
        format!("{target}-bp-{slug}-{millis}")
    }
}

/// Explanation posted on the original PR for a failed backport.
pub fn failure_comment(branch: &str, err: &BackportError, commit_limit: usize) -> String {
    match err {
        BackportError::NoCommits => messages::no_commits(branch),
        BackportError::CommitLimitExceeded { count } => {
            messages::too_many_commits(branch, *count, commit_limit)
        }
        BackportError::PatchApplyConflict { annotations } => {
            messages::backport_conflicted(branch, annotations)
        }
        BackportError::BranchNotFound { branch } => messages::branch_not_found(branch),
        BackportError::Transition(TransitionError::InvalidTransition {
            from: Some(phase), ..
        }) => messages::backport_not_opened(branch, *phase),
        other => messages::backport_errored(branch, &other.to_string()),
    }
}

fn check_annotation(conflict: &ConflictAnnotation) -> CheckAnnotation {
    CheckAnnotation {
        path: conflict.path.clone(),
        start_line: conflict.start_line,
        end_line: conflict.end_line,
        annotation_level: AnnotationLevel::Failure,
        message: conflict.message.clone(),
        raw_details: Some(conflict.raw_conflict_text.clone()),
    }
}

/// State shared by every job.
struct Shared<G> {
    github: Arc<G>,
    machine: BackportStateMachine<G>,
    cache: RepositoryCache,
    engine: PatchBackportEngine,
    config: BackportConfig,
    slug: RepoSlug,
    credentials: RepoCredentials,
}

/// One admitted job.
#[derive(Debug, Clone)]
struct JobSpec {
    original: PrNumber,
    head_sha: Sha,
    branch: String,
    purpose: BackportPurpose,
}

/// Runs backport jobs for one repository.
///
/// Cloning is cheap; clones share the queue.
pub struct BackportRunner<G> {
    queue: ExecutionQueue<BackportError>,
    shared: Arc<Shared<G>>,
}

impl<G> Clone for BackportRunner<G> {
    fn clone(&self) -> Self {
        BackportRunner {
            queue: self.queue.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<G> fmt::Debug for BackportRunner<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackportRunner")
            .field("slug", &self.shared.slug)
            .field("active", &self.queue.active_count())
            .field("queued", &self.queue.queued_count())
            .finish_non_exhaustive()
    }
}

impl<G> BackportRunner<G>
where
    G: GitHubInterpreter<Error = GitHubApiError> + Send + Sync + 'static,
{
    pub fn new(
        github: Arc<G>,
        config: BackportConfig,
        slug: RepoSlug,
        credentials: RepoCredentials,
    ) -> Self {
        let machine = BackportStateMachine::new(
            Arc::clone(&github),
            config.labels.clone(),
            config.bot_login.clone(),
        );
        let shared = Shared {
            machine,
            cache: RepositoryCache::new(config.cache_dir.clone(), config.remote_base.clone()),
            engine: PatchBackportEngine::new(config.commit_identity.clone(), config.commit_limit),
            github,
            config,
            slug,
            credentials,
        };
        BackportRunner {
            queue: ExecutionQueue::new(shared.config.max_active_jobs),
            shared: Arc::new(shared),
        }
    }

    pub fn queue(&self) -> &ExecutionQueue<BackportError> {
        &self.queue
    }

    pub fn state_machine(&self) -> &BackportStateMachine<G> {
        &self.shared.machine
    }

    /// Submits a backport of `original` to `branch`.
    pub fn enqueue(
        &self,
        original: &PullRequest,
        branch: impl Into<String>,
        purpose: BackportPurpose,
    ) -> Admission {
        let spec = JobSpec {
            original: original.number,
            head_sha: original.head_sha.clone(),
            branch: branch.into(),
            purpose,
        };
        let identifier = job_identifier(&spec.head_sha, &spec.branch, purpose);

        let shared = Arc::clone(&self.shared);
        let run_spec = spec.clone();
        let run = async move { shared.run(&run_spec).await };

        let shared = Arc::clone(&self.shared);
        let on_settled = move |outcome: JobOutcome<BackportError>| async move {
            shared.settle(&spec, outcome).await
        };

        let admission = self.queue.enter_queue(identifier.clone(), run, on_settled);
        info!(identifier = %identifier, ?admission, "Backport requested");
        admission
    }

    /// The most recent supported release branches of the repository.
    pub async fn supported_target_branches(&self) -> Result<Vec<String>, GitHubApiError> {
        let branches = self.shared.ops().branches().await?;
        let config = &self.shared.config;
        Ok(config
            .branches
            .supported_branches(branches.as_slice(), config.supported_versions))
    }

    /// True if `user` has write access to the repository.
    pub async fn may_request_backport(&self, user: &str) -> Result<bool, GitHubApiError> {
        let permission = self.shared.ops().permission(user).await?;
        Ok(WRITE_PERMISSIONS.contains(&permission.as_str()))
    }
}

impl<G> Shared<G>
where
    G: GitHubInterpreter<Error = GitHubApiError> + Send + Sync + 'static,
{
    fn ops(&self) -> GitHubOps<'_, G> {
        GitHubOps::new(self.github.as_ref())
    }

    #[instrument(
        skip_all,
        fields(pr = %spec.original, branch = %spec.branch, purpose = %spec.purpose)
    )]
    async fn run(&self, spec: &JobSpec) -> Result<(), BackportError> {
        let ops = self.ops();
        let pr = ops.pull_request(spec.original).await?;

        if ops.branch(spec.branch.as_str()).await?.is_none() {
            return Err(BackportError::BranchNotFound {
                branch: spec.branch.clone(),
            });
        }

        let commits = ops.pr_commits(pr.number).await?;
        self.engine.check_commit_count(commits.len())?;

        // Nothing is written to GitHub before this point.
        match spec.purpose {
            BackportPurpose::Execute => {
                self.machine.ensure_target(pr.number, &spec.branch).await?;
                self.machine
                    .validate(pr.number, &spec.branch, BackportEvent::BackportOpened)
                    .await?;
            }
            BackportPurpose::Check => {
                self.start_check(&spec.head_sha, &spec.branch).await?;
            }
        }

        let working_copy = self
            .cache
            .prepare_working_copy(&self.slug, &self.credentials)
            .await?;
        let request = BackportRequest {
            target_branch: spec.branch.clone(),
            temp_branch: temp_branch_name(
                &spec.branch,
                &pr.title,
                chrono::Utc::now().timestamp_millis(),
            ),
            commits: commits.into_iter().map(|c| c.sha).collect(),
            squash_commit: pr.state.merge_commit_sha().cloned(),
            push: spec.purpose == BackportPurpose::Execute,
        };
        self.engine.backport(&working_copy, &request, &ops).await?;

        if spec.purpose == BackportPurpose::Execute {
            self.open_backport_pr(&pr, &request).await?;
        }
        Ok(())
    }

    async fn open_backport_pr(
        &self,
        original: &PullRequest,
        request: &BackportRequest,
    ) -> Result<PrNumber, BackportError> {
        let ops = self.ops();
        let branch = request.target_branch.as_str();
        let number = ops
            .create_pr(
                messages::backport_title(branch, &original.title),
                messages::backport_body(original.number, original.body_text()),
                request.temp_branch.as_str(),
                branch,
            )
            .await?;
        info!(backport = %number, "Opened backport PR");

        ops.add_labels(number, vec![BACKPORT_LABEL.to_string(), branch.to_string()])
            .await?;
        if original.author != self.config.bot_login {
            // The author may not be a collaborator, in which case GitHub
            // refuses the request.
            if let Err(e) = ops
                .request_reviewers(number, vec![original.author.clone()])
                .await
            {
                warn!(backport = %number, error = %e, "Failed to request review");
            }
        }

        self.machine
            .on_backport_opened(original.number, branch, number)
            .await?;
        Ok(number)
    }

    /// Reports a finished job. Errors here are logged by the queue.
    async fn settle(
        &self,
        spec: &JobSpec,
        outcome: JobOutcome<BackportError>,
    ) -> Result<(), BackportError> {
        if let JobOutcome::Failed(BackportError::NoCommits) = &outcome {
            info!(pr = %spec.original, branch = %spec.branch, "Nothing to backport");
            return Ok(());
        }

        match &outcome {
            JobOutcome::Succeeded => {
                info!(
                    pr = %spec.original,
                    branch = %spec.branch,
                    purpose = %spec.purpose,
                    "Backport job succeeded"
                );
            }
            JobOutcome::Failed(err) if err.is_user_visible() => {
                info!(
                    pr = %spec.original,
                    branch = %spec.branch,
                    error = %err,
                    "Backport needs manual work"
                );
            }
            JobOutcome::Failed(err) => {
                error!(
                    pr = %spec.original,
                    branch = %spec.branch,
                    error = %err,
                    "Backport job failed"
                );
            }
        }

        match spec.purpose {
            BackportPurpose::Execute => match outcome {
                JobOutcome::Succeeded => Ok(()),
                JobOutcome::Failed(err) => self.report_failure(spec, &err).await,
            },
            BackportPurpose::Check => self.finish_check(spec, &outcome).await,
        }
    }

    /// Posts the failure comment and marks the backport as needing manual
    /// work. A missing branch only gets the comment, and so does a refusal
    /// to open a PR from the backport's current phase.
    async fn report_failure(&self, spec: &JobSpec, err: &BackportError) -> Result<(), BackportError> {
        let comment = failure_comment(&spec.branch, err, self.engine.commit_limit());
        if let BackportError::BranchNotFound { .. } | BackportError::Transition(_) = err {
            self.ops().post_comment(spec.original, comment).await?;
            return Ok(());
        }
        self.machine.ensure_target(spec.original, &spec.branch).await?;
        self.machine
            .on_backport_failed(spec.original, &spec.branch, &comment)
            .await?;
        Ok(())
    }

    /// Finds this branch's check run on `head_sha` or creates one.
    async fn check_run(&self, head_sha: &Sha, branch: &str) -> Result<CheckRunId, GitHubApiError> {
        let ops = self.ops();
        let name = messages::check_run_name(branch);
        let existing = ops.check_runs(head_sha, name.as_str()).await?;
        match existing.iter().map(|run| run.id).max() {
            Some(id) => Ok(id),
            None => {
                ops.create_check_run(name, head_sha, CheckRunStatus::Queued)
                    .await
            }
        }
    }

    async fn start_check(&self, head_sha: &Sha, branch: &str) -> Result<(), GitHubApiError> {
        let id = self.check_run(head_sha, branch).await?;
        self.ops()
            .update_check_run(id, CheckRunStatus::InProgress, None, None)
            .await
    }

    async fn finish_check(
        &self,
        spec: &JobSpec,
        outcome: &JobOutcome<BackportError>,
    ) -> Result<(), BackportError> {
        let (conclusion, output) = match outcome {
            JobOutcome::Succeeded => (
                CheckConclusion::Success,
                CheckRunOutput {
                    title: messages::CHECK_PASSED_TITLE.to_string(),
                    summary: messages::check_passed_summary(&spec.branch),
                    annotations: Vec::new(),
                },
            ),
            JobOutcome::Failed(err) => {
                let annotations = match err {
                    BackportError::PatchApplyConflict { annotations } => {
                        annotations.iter().map(check_annotation).collect()
                    }
                    _ => Vec::new(),
                };
                let conclusion = if err.is_user_visible() {
                    CheckConclusion::Failure
                } else {
                    CheckConclusion::Neutral
                };
                (
                    conclusion,
                    CheckRunOutput {
                        title: messages::CHECK_FAILED_TITLE.to_string(),
                        summary: failure_comment(&spec.branch, err, self.engine.commit_limit()),
                        annotations,
                    },
                )
            }
        };

        let id = self.check_run(&spec.head_sha, &spec.branch).await?;
        self.ops()
            .update_check_run(id, CheckRunStatus::Completed, Some(conclusion), Some(output))
            .await?;
        Ok(())
    }
}
