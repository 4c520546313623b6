//! Shared test utilities: git fixtures, an in-memory GitHub, and arbitrary
//! generators for property-based testing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use proptest::prelude::*;
use tempfile::TempDir;

use crate::effects::{
    BranchData, CheckConclusion, CheckRunData, CheckRunOutput, CheckRunStatus, CommentData,
    CommitData, GitHubEffect, GitHubInterpreter, GitHubResponse,
};
use crate::git::CommitIdentity;
use crate::github::GitHubApiError;
use crate::types::{CheckRunId, CommentId, PrNumber, PrState, PullRequest, RepoSlug, Sha};

pub fn arb_pr_number() -> impl Strategy<Value = PrNumber> {
    (1u64..1_000_000).prop_map(PrNumber)
}

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(|s| Sha::parse(s).unwrap())
}

pub fn arb_branch_name() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9.-]{0,30}".prop_map(String::from)
}

pub fn test_identity() -> CommitIdentity {
    CommitIdentity {
        name: "Test".to_string(),
        email: "test@test.com".to_string(),
    }
}

/// Run git synchronously with an isolated config, panicking on failure.
///
/// Returns trimmed stdout.
pub fn git_sync(workdir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(workdir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_TERMINAL_PROMPT", "0")
        .args(["-c", "user.name=Test", "-c", "user.email=test@test.com"])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A local stand-in for a hosted repository.
///
/// ```text
/// <root>/remote/<owner>/<name>.git   bare upstream ("remote base" = <root>/remote)
/// <root>/cache/                      repository cache base directory
/// <root>/seed/                       working clone used to author commits
/// ```
///
/// The upstream starts with a single commit on `main`.
pub struct UpstreamFixture {
    pub slug: RepoSlug,
    root: TempDir,
}

impl UpstreamFixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let slug = RepoSlug::new("owner", "repo");
        let fixture = UpstreamFixture { slug, root };

        let upstream = fixture.upstream_path();
        std::fs::create_dir_all(&upstream).unwrap();
        git_sync(&upstream, &["init", "-q", "--bare"]);
        git_sync(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let seed = fixture.seed_dir();
        std::fs::create_dir_all(&seed).unwrap();
        git_sync(&seed, &["init", "-q"]);
        git_sync(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(seed.join("README.md"), "# Test\n").unwrap();
        git_sync(&seed, &["add", "."]);
        git_sync(&seed, &["commit", "-q", "-m", "Initial commit"]);
        git_sync(&seed, &["remote", "add", "origin", upstream.to_str().unwrap()]);
        git_sync(&seed, &["push", "-q", "origin", "HEAD:refs/heads/main"]);

        fixture
    }

    /// Creates a second upstream `<owner>/<name>` with the same history.
    pub fn add_repository(&self, name: &str) -> RepoSlug {
        let slug = RepoSlug::new(self.slug.owner.clone(), name);
        let path = self
            .root
            .path()
            .join("remote")
            .join(&slug.owner)
            .join(format!("{name}.git"));
        git_sync(
            self.root.path(),
            &[
                "clone",
                "-q",
                "--bare",
                self.upstream_path().to_str().unwrap(),
                path.to_str().unwrap(),
            ],
        );
        slug
    }

    pub fn remote_base(&self) -> String {
        self.root.path().join("remote").to_string_lossy().into_owned()
    }

    pub fn upstream_path(&self) -> PathBuf {
        self.root
            .path()
            .join("remote")
            .join(&self.slug.owner)
            .join(format!("{}.git", self.slug.name))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.path().join("cache")
    }

    pub fn seed_dir(&self) -> PathBuf {
        self.root.path().join("seed")
    }

    /// Creates `branch` on the upstream, pointing at `from`.
    pub fn create_branch(&self, branch: &str, from: &str) {
        let seed = self.seed_dir();
        git_sync(&seed, &["fetch", "-q", "origin"]);
        git_sync(
            &seed,
            &["push", "-q", "origin", &format!("refs/remotes/origin/{from}:refs/heads/{branch}")],
        );
    }

    /// Commits `content` to `path` on `branch` and pushes it upstream.
    pub fn commit_file(&self, branch: &str, path: &str, content: &str, message: &str) -> Sha {
        let seed = self.seed_dir();
        git_sync(&seed, &["fetch", "-q", "origin"]);
        git_sync(&seed, &["checkout", "-q", "-B", branch, &format!("origin/{branch}")]);
        std::fs::write(seed.join(path), content).unwrap();
        git_sync(&seed, &["add", "."]);
        git_sync(&seed, &["commit", "-q", "-m", message]);
        git_sync(&seed, &["push", "-q", "origin", &format!("HEAD:refs/heads/{branch}")]);
        Sha::parse(git_sync(&seed, &["rev-parse", "HEAD"])).unwrap()
    }

    /// Squash-merges `feature` into `base` upstream and returns the squash commit.
    pub fn squash_merge(&self, feature: &str, base: &str, message: &str) -> Sha {
        let seed = self.seed_dir();
        git_sync(&seed, &["fetch", "-q", "origin"]);
        git_sync(&seed, &["checkout", "-q", "-B", base, &format!("origin/{base}")]);
        git_sync(&seed, &["merge", "-q", "--squash", &format!("origin/{feature}")]);
        git_sync(&seed, &["commit", "-q", "-m", message]);
        git_sync(&seed, &["push", "-q", "origin", &format!("HEAD:refs/heads/{base}")]);
        Sha::parse(git_sync(&seed, &["rev-parse", "HEAD"])).unwrap()
    }

    /// Mailbox-format patch for a single commit.
    pub fn format_patch(&self, sha: &Sha) -> String {
        let output = Command::new("git")
            .current_dir(self.seed_dir())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .args(["format-patch", "-1", "--stdout", sha.as_str()])
            .output()
            .unwrap();
        assert!(output.status.success());
        // Not trimmed: `git am` needs the trailing newline.
        String::from_utf8(output.stdout).unwrap()
    }

    /// Contents of `path` at the tip of upstream `branch`.
    pub fn upstream_file(&self, branch: &str, path: &str) -> String {
        git_sync(&self.upstream_path(), &["show", &format!("{branch}:{path}")])
    }

    /// Returns true if `branch` exists upstream.
    pub fn upstream_has_branch(&self, branch: &str) -> bool {
        let output = Command::new("git")
            .current_dir(self.upstream_path())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .output()
            .unwrap();
        output.status.success()
    }
}

// ─── In-memory GitHub ─────────────────────────────────────────────────────────

pub fn test_pr(number: u64, head_sha: Sha) -> PullRequest {
    PullRequest {
        number: PrNumber(number),
        title: "Fix the thing".to_string(),
        body: Some("Fixes a bug.\n\nNotes: Fixed the thing.".to_string()),
        author: "octocat".to_string(),
        head_sha,
        head_ref: "feature".to_string(),
        base_ref: "main".to_string(),
        state: PrState::Open,
        labels: Vec::new(),
    }
}

/// A PR the bot opened through `CreatePr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPr {
    pub number: PrNumber,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone)]
pub struct FakeCheckRun {
    pub id: CheckRunId,
    pub name: String,
    pub head_sha: Sha,
    pub status: CheckRunStatus,
    pub conclusion: Option<CheckConclusion>,
    pub output: Option<CheckRunOutput>,
}

#[derive(Debug, Default)]
struct FakeState {
    prs: HashMap<PrNumber, PullRequest>,
    commits: HashMap<PrNumber, Vec<CommitData>>,
    patches: HashMap<Sha, String>,
    branches: Vec<String>,
    comments: HashMap<PrNumber, Vec<CommentData>>,
    created: Vec<CreatedPr>,
    reviewers: HashMap<PrNumber, Vec<String>>,
    check_runs: Vec<FakeCheckRun>,
    permissions: HashMap<String, String>,
    effects: Vec<GitHubEffect>,
    failing: Vec<String>,
    next_id: u64,
}

/// An in-memory repository that answers effects the way GitHub would.
#[derive(Debug, Default)]
pub struct FakeGitHub {
    state: Mutex<FakeState>,
}

fn not_found(what: impl std::fmt::Display) -> GitHubApiError {
    GitHubApiError::from_status(404, format!("{what} not found"))
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_pr(&self, pr: PullRequest) {
        self.state().prs.insert(pr.number, pr);
    }

    pub fn set_commits(&self, pr: PrNumber, shas: &[Sha]) {
        let commits = shas
            .iter()
            .map(|sha| CommitData {
                sha: sha.clone(),
                message: format!("commit {}", sha.short()),
            })
            .collect();
        self.state().commits.insert(pr, commits);
    }

    pub fn add_patch(&self, sha: &Sha, patch: String) {
        self.state().patches.insert(sha.clone(), patch);
    }

    pub fn add_branch(&self, branch: &str) {
        self.state().branches.push(branch.to_string());
    }

    pub fn set_permission(&self, user: &str, permission: &str) {
        self.state()
            .permissions
            .insert(user.to_string(), permission.to_string());
    }

    pub fn add_comment(&self, pr: PrNumber, author: &str, body: &str) {
        let mut state = self.state();
        state.next_id += 1;
        let id = CommentId(state.next_id);
        state.comments.entry(pr).or_default().push(CommentData {
            id,
            author: author.to_string(),
            body: body.to_string(),
        });
    }

    /// Adds a queued check run, as an earlier job would have.
    pub fn add_check_run(&self, name: &str, head_sha: &Sha) -> CheckRunId {
        let mut state = self.state();
        state.next_id += 1;
        let id = CheckRunId(state.next_id);
        state.check_runs.push(FakeCheckRun {
            id,
            name: name.to_string(),
            head_sha: head_sha.clone(),
            status: CheckRunStatus::Queued,
            conclusion: None,
            output: None,
        });
        id
    }

    /// Makes every effect with this serde tag (e.g. `"add_labels"`) fail.
    pub fn fail_on(&self, effect: &str) {
        self.state().failing.push(effect.to_string());
    }

    pub fn labels(&self, pr: PrNumber) -> Vec<String> {
        self.state()
            .prs
            .get(&pr)
            .map(|p| p.labels.clone())
            .unwrap_or_default()
    }

    pub fn comments(&self, pr: PrNumber) -> Vec<String> {
        self.state()
            .comments
            .get(&pr)
            .map(|c| c.iter().map(|c| c.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn created_prs(&self) -> Vec<CreatedPr> {
        self.state().created.clone()
    }

    pub fn reviewers(&self, pr: PrNumber) -> Vec<String> {
        self.state().reviewers.get(&pr).cloned().unwrap_or_default()
    }

    pub fn check_runs(&self) -> Vec<FakeCheckRun> {
        self.state().check_runs.clone()
    }

    pub fn effects(&self) -> Vec<GitHubEffect> {
        self.state().effects.clone()
    }

    fn apply(&self, effect: GitHubEffect) -> Result<GitHubResponse, GitHubApiError> {
        let mut state = self.state();
        state.effects.push(effect.clone());

        let kind = effect.name();
        if state.failing.iter().any(|f| f == kind) {
            return Err(GitHubApiError::from_status(500, format!("injected failure: {kind}")));
        }

        match effect {
            GitHubEffect::GetPr { pr } => state
                .prs
                .get(&pr)
                .cloned()
                .map(GitHubResponse::Pr)
                .ok_or_else(|| not_found(pr)),
            GitHubEffect::ListPrCommits { pr } => Ok(GitHubResponse::Commits(
                state.commits.get(&pr).cloned().unwrap_or_default(),
            )),
            GitHubEffect::GetCommitPatch { sha } => state
                .patches
                .get(&sha)
                .cloned()
                .map(GitHubResponse::Patch)
                .ok_or_else(|| not_found(sha)),
            GitHubEffect::CreatePr {
                title,
                body,
                head,
                base,
            } => {
                state.next_id += 1;
                let number = PrNumber(state.next_id + 1000);
                let mut pr = test_pr(number.0, Sha::parse("f".repeat(40)).unwrap());
                pr.title = title.clone();
                pr.body = Some(body.clone());
                pr.author = "backport-bot[bot]".to_string();
                pr.head_ref = head.clone();
                pr.base_ref = base.clone();
                state.prs.insert(number, pr);
                state.created.push(CreatedPr {
                    number,
                    title,
                    body,
                    head,
                    base,
                });
                Ok(GitHubResponse::PrCreated { number })
            }
            GitHubEffect::RequestReviewers { pr, reviewers } => {
                state.reviewers.entry(pr).or_default().extend(reviewers);
                Ok(GitHubResponse::ReviewersRequested)
            }
            GitHubEffect::PostComment { pr, body } => {
                state.next_id += 1;
                let id = CommentId(state.next_id);
                state.comments.entry(pr).or_default().push(CommentData {
                    id,
                    author: "backport-bot[bot]".to_string(),
                    body,
                });
                Ok(GitHubResponse::CommentPosted { id })
            }
            GitHubEffect::ListComments { pr } => Ok(GitHubResponse::Comments(
                state.comments.get(&pr).cloned().unwrap_or_default(),
            )),
            GitHubEffect::AddLabels { pr, labels } => {
                let pull = state.prs.get_mut(&pr).ok_or_else(|| not_found(pr))?;
                for label in labels {
                    if !pull.labels.contains(&label) {
                        pull.labels.push(label);
                    }
                }
                Ok(GitHubResponse::LabelsAdded)
            }
            GitHubEffect::RemoveLabel { pr, label } => {
                let pull = state.prs.get_mut(&pr).ok_or_else(|| not_found(pr))?;
                let before = pull.labels.len();
                pull.labels.retain(|l| *l != label);
                Ok(GitHubResponse::LabelRemoved {
                    was_present: pull.labels.len() != before,
                })
            }
            GitHubEffect::ListLabels { pr } => state
                .prs
                .get(&pr)
                .map(|p| GitHubResponse::Labels(p.labels.clone()))
                .ok_or_else(|| not_found(pr)),
            GitHubEffect::CreateCheckRun {
                name,
                head_sha,
                status,
            } => {
                state.next_id += 1;
                let id = CheckRunId(state.next_id);
                state.check_runs.push(FakeCheckRun {
                    id,
                    name,
                    head_sha,
                    status,
                    conclusion: None,
                    output: None,
                });
                Ok(GitHubResponse::CheckRunCreated { id })
            }
            GitHubEffect::ListCheckRuns { head_sha, name } => Ok(GitHubResponse::CheckRuns(
                state
                    .check_runs
                    .iter()
                    .filter(|run| run.head_sha == head_sha && run.name == name)
                    .map(|run| CheckRunData {
                        id: run.id,
                        name: run.name.clone(),
                        status: run.status,
                        conclusion: run.conclusion,
                    })
                    .collect(),
            )),
            GitHubEffect::UpdateCheckRun {
                id,
                status,
                conclusion,
                output,
            } => {
                let run = state
                    .check_runs
                    .iter_mut()
                    .find(|run| run.id == id)
                    .ok_or_else(|| not_found(id))?;
                run.status = status;
                run.conclusion = conclusion;
                if output.is_some() {
                    run.output = output;
                }
                Ok(GitHubResponse::CheckRunUpdated)
            }
            GitHubEffect::ListBranches => Ok(GitHubResponse::Branches(state.branches.clone())),
            GitHubEffect::GetBranch { branch } => Ok(GitHubResponse::Branch(
                state.branches.contains(&branch).then(|| BranchData {
                    name: branch,
                    sha: Sha::parse("e".repeat(40)).unwrap(),
                }),
            )),
            GitHubEffect::GetCollaboratorPermission { user } => Ok(GitHubResponse::Permission(
                state
                    .permissions
                    .get(&user)
                    .cloned()
                    .unwrap_or_else(|| "none".to_string()),
            )),
        }
    }
}

impl GitHubInterpreter for FakeGitHub {
    type Error = GitHubApiError;

    async fn interpret(&self, effect: GitHubEffect) -> Result<GitHubResponse, Self::Error> {
        self.apply(effect)
    }
}
