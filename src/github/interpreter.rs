//! GitHub effect interpreter using octocrab.
//!
//! This module implements the `GitHubInterpreter` trait, executing GitHub effects
//! against the real GitHub API via octocrab.
//!
//! Key implementation details:
//! - Commit patches are fetched with the `application/vnd.github.v3.patch` media type
//! - Label names are percent-encoded in URLs (they contain `/`)
//! - Check-run annotations are sent in batches of 50, GitHub's per-request cap
//! - Transient errors are retried per effect (see [`super::retry`])

use chrono::{DateTime, Utc};
use http::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::effects::{
    BranchData, CheckAnnotation, CheckConclusion, CheckRunData, CheckRunOutput, CheckRunStatus,
    CommentData, CommitData, GitHubEffect, GitHubInterpreter, GitHubResponse,
};
use crate::types::{CheckRunId, CommentId, PrNumber, PrState, PullRequest, Sha};

use super::client::OctocrabClient;
use super::error::GitHubApiError;
use super::retry::{RetryConfig, retry_with_backoff};

/// GitHub rejects check-run updates carrying more annotations than this.
pub const MAX_ANNOTATIONS_PER_REQUEST: usize = 50;

const PAGE_SIZE: usize = 100;

const PATCH_MEDIA_TYPE: &str = "application/vnd.github.v3.patch";

// ─── Interpreter Implementation ───────────────────────────────────────────────

impl GitHubInterpreter for OctocrabClient {
    type Error = GitHubApiError;

    async fn interpret(&self, effect: GitHubEffect) -> Result<GitHubResponse, Self::Error> {
        interpret_github_effect(self, effect).await
    }
}

/// Interprets a GitHub effect, executing it against the GitHub API.
///
/// Transient failures are retried on the effect's [`RetryConfig`] schedule.
pub async fn interpret_github_effect(
    client: &OctocrabClient,
    effect: GitHubEffect,
) -> Result<GitHubResponse, GitHubApiError> {
    let config = RetryConfig::for_effect(&effect);
    retry_with_backoff(&effect, config, || execute_effect(client, effect.clone())).await
}

/// Executes a single effect without retry logic.
async fn execute_effect(
    client: &OctocrabClient,
    effect: GitHubEffect,
) -> Result<GitHubResponse, GitHubApiError> {
    match effect {
        GitHubEffect::GetPr { pr } => get_pr(client, pr).await,
        GitHubEffect::ListPrCommits { pr } => list_pr_commits(client, pr).await,
        GitHubEffect::GetCommitPatch { sha } => get_commit_patch(client, &sha).await,
        GitHubEffect::CreatePr {
            title,
            body,
            head,
            base,
        } => create_pr(client, title, body, head, base).await,
        GitHubEffect::RequestReviewers { pr, reviewers } => {
            request_reviewers(client, pr, reviewers).await
        }
        GitHubEffect::PostComment { pr, body } => post_comment(client, pr, body).await,
        GitHubEffect::ListComments { pr } => list_comments(client, pr).await,
        GitHubEffect::AddLabels { pr, labels } => add_labels(client, pr, labels).await,
        GitHubEffect::RemoveLabel { pr, label } => remove_label(client, pr, &label).await,
        GitHubEffect::ListLabels { pr } => list_labels(client, pr).await,
        GitHubEffect::CreateCheckRun {
            name,
            head_sha,
            status,
        } => create_check_run(client, name, head_sha, status).await,
        GitHubEffect::ListCheckRuns { head_sha, name } => {
            list_check_runs(client, &head_sha, &name).await
        }
        GitHubEffect::UpdateCheckRun {
            id,
            status,
            conclusion,
            output,
        } => update_check_run(client, id, status, conclusion, output).await,
        GitHubEffect::ListBranches => list_branches(client).await,
        GitHubEffect::GetBranch { branch } => get_branch(client, &branch).await,
        GitHubEffect::GetCollaboratorPermission { user } => {
            get_collaborator_permission(client, &user).await
        }
    }
}

/// Fetches every page of a list endpoint that takes `per_page`/`page` params.
async fn get_all_pages<T>(client: &OctocrabClient, path: &str) -> Result<Vec<T>, GitHubApiError>
where
    T: for<'de> Deserialize<'de>,
{
    let mut page = 1u32;
    let mut all = Vec::new();

    loop {
        let url = format!("{path}?per_page={PAGE_SIZE}&page={page}");
        let items: Vec<T> = client
            .inner()
            .get(&url, None::<&()>)
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        let is_last_page = items.len() < PAGE_SIZE;
        all.extend(items);
        if is_last_page {
            break;
        }
        page += 1;
    }

    Ok(all)
}

fn parse_sha(sha: &str, what: &str) -> Result<Sha, GitHubApiError> {
    Sha::parse(sha)
        .map_err(|e| GitHubApiError::permanent_without_source(format!("Invalid {what}: {e}")))
}

// ─── Pull Requests ────────────────────────────────────────────────────────────

async fn get_pr(client: &OctocrabClient, pr: PrNumber) -> Result<GitHubResponse, GitHubApiError> {
    let pull = client
        .inner()
        .pulls(client.owner(), client.repo_name())
        .get(pr.0)
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    let state = match pull.merged_at {
        Some(_) => {
            // merge_commit_sha can lag behind merged_at for a moment after the
            // merge; treat that as transient so the retry picks it up.
            let sha = pull.merge_commit_sha.as_ref().ok_or_else(|| {
                GitHubApiError::transient_without_source(format!(
                    "PR {pr} is merged but merge_commit_sha not yet available"
                ))
            })?;
            PrState::Merged {
                merge_commit_sha: parse_sha(sha, "merge commit SHA")?,
            }
        }
        None if pull.state == Some(octocrab::models::IssueState::Closed) => PrState::Closed,
        None => PrState::Open,
    };

    Ok(GitHubResponse::Pr(PullRequest {
        number: pr,
        title: pull.title.unwrap_or_default(),
        body: pull.body,
        author: pull.user.map(|user| user.login).unwrap_or_default(),
        head_sha: parse_sha(&pull.head.sha, "head SHA")?,
        head_ref: pull.head.ref_field,
        base_ref: pull.base.ref_field,
        state,
        labels: pull
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|label| label.name)
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct PrCommitResponse {
    sha: String,
    commit: PrCommitDetail,
}

#[derive(Debug, Deserialize)]
struct PrCommitDetail {
    message: String,
}

/// Lists PR commits oldest first (the order GitHub returns them in).
///
/// GitHub stops listing at 250 commits; callers enforce a lower ceiling.
async fn list_pr_commits(
    client: &OctocrabClient,
    pr: PrNumber,
) -> Result<GitHubResponse, GitHubApiError> {
    let path = format!("{}/pulls/{}/commits", client.repo_path(), pr.0);
    let commits: Vec<PrCommitResponse> = get_all_pages(client, &path).await?;
    Ok(GitHubResponse::Commits(convert_commits(commits)?))
}

fn convert_commits(commits: Vec<PrCommitResponse>) -> Result<Vec<CommitData>, GitHubApiError> {
    commits
        .into_iter()
        .map(|c| {
            Ok(CommitData {
                sha: parse_sha(&c.sha, "commit SHA")?,
                message: c.commit.message,
            })
        })
        .collect()
}

async fn get_commit_patch(
    client: &OctocrabClient,
    sha: &Sha,
) -> Result<GitHubResponse, GitHubApiError> {
    let url = format!("{}/commits/{}", client.repo_path(), sha);
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(PATCH_MEDIA_TYPE));

    let response = client
        .inner()
        ._get_with_headers(url, Some(headers))
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    let status = response.status();
    let body = client
        .inner()
        .body_to_string(response)
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    if !status.is_success() {
        return Err(GitHubApiError::from_status(
            status.as_u16(),
            format!("fetching patch for {}: {}", sha.short(), body.trim()),
        ));
    }
    Ok(GitHubResponse::Patch(body))
}

async fn create_pr(
    client: &OctocrabClient,
    title: String,
    body: String,
    head: String,
    base: String,
) -> Result<GitHubResponse, GitHubApiError> {
    let pull = client
        .inner()
        .pulls(client.owner(), client.repo_name())
        .create(title, head, base)
        .body(body)
        .maintainer_can_modify(true)
        .send()
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    Ok(GitHubResponse::PrCreated {
        number: PrNumber(pull.number),
    })
}

async fn request_reviewers(
    client: &OctocrabClient,
    pr: PrNumber,
    reviewers: Vec<String>,
) -> Result<GitHubResponse, GitHubApiError> {
    #[derive(Serialize)]
    struct ReviewRequest {
        reviewers: Vec<String>,
    }

    let url = format!("{}/pulls/{}/requested_reviewers", client.repo_path(), pr.0);
    let _: serde_json::Value = client
        .inner()
        .post(&url, Some(&ReviewRequest { reviewers }))
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    Ok(GitHubResponse::ReviewersRequested)
}

// ─── Comments ─────────────────────────────────────────────────────────────────

async fn post_comment(
    client: &OctocrabClient,
    pr: PrNumber,
    body: String,
) -> Result<GitHubResponse, GitHubApiError> {
    let comment = client
        .inner()
        .issues(client.owner(), client.repo_name())
        .create_comment(pr.0, body)
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    Ok(GitHubResponse::CommentPosted {
        id: CommentId(comment.id.into_inner()),
    })
}

async fn list_comments(
    client: &OctocrabClient,
    pr: PrNumber,
) -> Result<GitHubResponse, GitHubApiError> {
    let mut page = 1u32;
    let mut all_comments = Vec::new();

    loop {
        let page_result = client
            .inner()
            .issues(client.owner(), client.repo_name())
            .list_comments(pr.0)
            .per_page(PAGE_SIZE as u8)
            .page(page)
            .send()
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        let items = page_result.items;
        let is_last_page = items.len() < PAGE_SIZE;

        for comment in items {
            all_comments.push(CommentData {
                id: CommentId(comment.id.into_inner()),
                author: comment.user.login,
                body: comment.body.unwrap_or_default(),
            });
        }

        if is_last_page {
            break;
        }
        page += 1;
    }

    Ok(GitHubResponse::Comments(all_comments))
}

// ─── Labels ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LabelResponse {
    name: String,
}

async fn add_labels(
    client: &OctocrabClient,
    pr: PrNumber,
    labels: Vec<String>,
) -> Result<GitHubResponse, GitHubApiError> {
    client
        .inner()
        .issues(client.owner(), client.repo_name())
        .add_labels(pr.0, &labels)
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    Ok(GitHubResponse::LabelsAdded)
}

async fn remove_label(
    client: &OctocrabClient,
    pr: PrNumber,
    label: &str,
) -> Result<GitHubResponse, GitHubApiError> {
    // Label names like "target/8-x-y" must be encoded as a single path segment.
    let url = format!(
        "{}/issues/{}/labels/{}",
        client.repo_path(),
        pr.0,
        urlencoding::encode(label)
    );

    let result: Result<serde_json::Value, _> = client.inner().delete(&url, None::<&()>).await;
    match result {
        Ok(_) => Ok(GitHubResponse::LabelRemoved { was_present: true }),
        Err(e) => {
            let err = GitHubApiError::from_octocrab(e);
            if err.is_not_found() {
                Ok(GitHubResponse::LabelRemoved { was_present: false })
            } else {
                Err(err)
            }
        }
    }
}

async fn list_labels(
    client: &OctocrabClient,
    pr: PrNumber,
) -> Result<GitHubResponse, GitHubApiError> {
    let path = format!("{}/issues/{}/labels", client.repo_path(), pr.0);
    let labels: Vec<LabelResponse> = get_all_pages(client, &path).await?;
    Ok(GitHubResponse::Labels(
        labels.into_iter().map(|label| label.name).collect(),
    ))
}

// ─── Check Runs ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    id: u64,
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunListResponse {
    check_runs: Vec<CheckRunResponse>,
}

#[derive(Debug, Serialize)]
struct CreateCheckRunRequest<'a> {
    name: &'a str,
    head_sha: &'a str,
    status: &'static str,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct UpdateCheckRunRequest<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<OutputRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct OutputRequest<'a> {
    title: &'a str,
    summary: &'a str,
    annotations: &'a [CheckAnnotation],
}

/// Maps a GitHub check-run status; the rarer pending states count as queued.
fn parse_check_run_status(status: &str) -> CheckRunStatus {
    match status {
        "in_progress" => CheckRunStatus::InProgress,
        "completed" => CheckRunStatus::Completed,
        _ => CheckRunStatus::Queued,
    }
}

fn parse_check_conclusion(conclusion: &str) -> Option<CheckConclusion> {
    match conclusion {
        "success" => Some(CheckConclusion::Success),
        "failure" | "timed_out" => Some(CheckConclusion::Failure),
        "neutral" | "skipped" | "stale" => Some(CheckConclusion::Neutral),
        "cancelled" => Some(CheckConclusion::Cancelled),
        "action_required" => Some(CheckConclusion::ActionRequired),
        _ => None,
    }
}

fn convert_check_run(run: CheckRunResponse) -> CheckRunData {
    CheckRunData {
        id: CheckRunId(run.id),
        name: run.name,
        status: parse_check_run_status(&run.status),
        conclusion: run.conclusion.as_deref().and_then(parse_check_conclusion),
    }
}

async fn create_check_run(
    client: &OctocrabClient,
    name: String,
    head_sha: Sha,
    status: CheckRunStatus,
) -> Result<GitHubResponse, GitHubApiError> {
    let url = format!("{}/check-runs", client.repo_path());
    let request = CreateCheckRunRequest {
        name: &name,
        head_sha: head_sha.as_str(),
        status: status.as_api_str(),
        started_at: Utc::now(),
    };

    let run: CheckRunResponse = client
        .inner()
        .post(&url, Some(&request))
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    Ok(GitHubResponse::CheckRunCreated {
        id: CheckRunId(run.id),
    })
}

async fn list_check_runs(
    client: &OctocrabClient,
    head_sha: &Sha,
    name: &str,
) -> Result<GitHubResponse, GitHubApiError> {
    let url = format!(
        "{}/commits/{}/check-runs?check_name={}&per_page={PAGE_SIZE}",
        client.repo_path(),
        head_sha,
        urlencoding::encode(name)
    );

    let list: CheckRunListResponse = client
        .inner()
        .get(&url, None::<&()>)
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    Ok(GitHubResponse::CheckRuns(
        list.check_runs.into_iter().map(convert_check_run).collect(),
    ))
}

/// Builds the update requests for one `UpdateCheckRun` effect.
///
/// The first request carries status, conclusion and the first batch of
/// annotations; GitHub appends the annotations of each later request.
fn update_requests<'a>(
    status: CheckRunStatus,
    conclusion: Option<CheckConclusion>,
    output: Option<&'a CheckRunOutput>,
    now: DateTime<Utc>,
) -> Vec<UpdateCheckRunRequest<'a>> {
    let completed_at = (status == CheckRunStatus::Completed).then_some(now);
    let conclusion = conclusion.map(|c| c.as_api_str());

    let Some(output) = output else {
        return vec![UpdateCheckRunRequest {
            status: status.as_api_str(),
            conclusion,
            completed_at,
            output: None,
        }];
    };

    let mut batches: Vec<&[CheckAnnotation]> = output
        .annotations
        .chunks(MAX_ANNOTATIONS_PER_REQUEST)
        .collect();
    if batches.is_empty() {
        batches.push(&[]);
    }

    batches
        .into_iter()
        .map(|annotations| UpdateCheckRunRequest {
            status: status.as_api_str(),
            conclusion,
            completed_at,
            output: Some(OutputRequest {
                title: &output.title,
                summary: &output.summary,
                annotations,
            }),
        })
        .collect()
}

async fn update_check_run(
    client: &OctocrabClient,
    id: CheckRunId,
    status: CheckRunStatus,
    conclusion: Option<CheckConclusion>,
    output: Option<CheckRunOutput>,
) -> Result<GitHubResponse, GitHubApiError> {
    let url = format!("{}/check-runs/{}", client.repo_path(), id.0);

    for request in update_requests(status, conclusion, output.as_ref(), Utc::now()) {
        let _: serde_json::Value = client
            .inner()
            .patch(&url, Some(&request))
            .await
            .map_err(GitHubApiError::from_octocrab)?;
    }

    Ok(GitHubResponse::CheckRunUpdated)
}

// ─── Repository ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

async fn list_branches(client: &OctocrabClient) -> Result<GitHubResponse, GitHubApiError> {
    let path = format!("{}/branches", client.repo_path());
    let branches: Vec<BranchResponse> = get_all_pages(client, &path).await?;
    Ok(GitHubResponse::Branches(
        branches.into_iter().map(|b| b.name).collect(),
    ))
}

async fn get_branch(client: &OctocrabClient, branch: &str) -> Result<GitHubResponse, GitHubApiError> {
    let url = format!(
        "{}/branches/{}",
        client.repo_path(),
        urlencoding::encode(branch)
    );

    let result: Result<BranchResponse, _> = client.inner().get(&url, None::<&()>).await;
    match result {
        Ok(found) => Ok(GitHubResponse::Branch(Some(BranchData {
            sha: parse_sha(&found.commit.sha, "branch SHA")?,
            name: found.name,
        }))),
        Err(e) => {
            let err = GitHubApiError::from_octocrab(e);
            if err.is_not_found() {
                Ok(GitHubResponse::Branch(None))
            } else {
                Err(err)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: String,
}

async fn get_collaborator_permission(
    client: &OctocrabClient,
    user: &str,
) -> Result<GitHubResponse, GitHubApiError> {
    let url = format!(
        "{}/collaborators/{}/permission",
        client.repo_path(),
        urlencoding::encode(user)
    );

    let result: Result<PermissionResponse, _> = client.inner().get(&url, None::<&()>).await;
    match result {
        Ok(found) => Ok(GitHubResponse::Permission(found.permission)),
        Err(e) => {
            // Non-collaborators 404 rather than reporting "none".
            let err = GitHubApiError::from_octocrab(e);
            if err.is_not_found() {
                Ok(GitHubResponse::Permission("none".to_string()))
            } else {
                Err(err)
            }
        }
    }
}
