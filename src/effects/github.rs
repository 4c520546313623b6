//! GitHub API effect types.
//!
//! These types describe GitHub API operations as data, without executing them.
//! [`crate::github::OctocrabClient`] executes them against the real API; tests
//! substitute scripted interpreters.

use serde::{Deserialize, Serialize};

use crate::types::{CheckRunId, CommentId, PrNumber, PullRequest, Sha};

/// Lifecycle status of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    Queued,
    InProgress,
    Completed,
}

impl CheckRunStatus {
    /// Returns the GitHub API string for this status.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            CheckRunStatus::Queued => "queued",
            CheckRunStatus::InProgress => "in_progress",
            CheckRunStatus::Completed => "completed",
        }
    }
}

/// Final conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    ActionRequired,
}

impl CheckConclusion {
    /// Returns the GitHub API string for this conclusion.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            CheckConclusion::Success => "success",
            CheckConclusion::Failure => "failure",
            CheckConclusion::Neutral => "neutral",
            CheckConclusion::Cancelled => "cancelled",
            CheckConclusion::ActionRequired => "action_required",
        }
    }
}

/// Severity of a check-run annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

/// A line-range annotation attached to a check run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckAnnotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub annotation_level: AnnotationLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_details: Option<String>,
}

/// The `output` block of a check run.
///
/// GitHub accepts at most 50 annotations per request; the interpreter splits
/// longer lists across several updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub annotations: Vec<CheckAnnotation>,
}

/// A GitHub API effect.
///
/// Each variant describes a GitHub API operation. Effects are repo-scoped:
/// the interpreter is constructed with a `RepoSlug`, so effects don't include it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitHubEffect {
    // ─── Pull Requests ────────────────────────────────────────────────────────
    /// Fetch a single PR by number.
    GetPr { pr: PrNumber },

    /// List the commits of a PR, oldest first.
    ListPrCommits { pr: PrNumber },

    /// Fetch a single commit in mailbox (`format-patch`) form.
    GetCommitPatch { sha: Sha },

    /// Open a new PR from `head` into `base`.
    CreatePr {
        title: String,
        body: String,
        head: String,
        base: String,
    },

    /// Request reviews from the given users.
    RequestReviewers { pr: PrNumber, reviewers: Vec<String> },

    // ─── Comments ─────────────────────────────────────────────────────────────
    /// Post a new comment on a PR.
    PostComment { pr: PrNumber, body: String },

    /// List all comments on a PR.
    ListComments { pr: PrNumber },

    // ─── Labels ───────────────────────────────────────────────────────────────
    /// Add labels to a PR, creating them in the repository if needed.
    AddLabels { pr: PrNumber, labels: Vec<String> },

    /// Remove a label from a PR. Removing an absent label is not an error.
    RemoveLabel { pr: PrNumber, label: String },

    /// List label names on a PR.
    ListLabels { pr: PrNumber },

    // ─── Check Runs ───────────────────────────────────────────────────────────
    /// Create a check run on `head_sha`.
    CreateCheckRun {
        name: String,
        head_sha: Sha,
        status: CheckRunStatus,
    },

    /// List check runs named `name` on `head_sha`.
    ListCheckRuns { head_sha: Sha, name: String },

    /// Update an existing check run.
    UpdateCheckRun {
        id: CheckRunId,
        status: CheckRunStatus,
        conclusion: Option<CheckConclusion>,
        output: Option<CheckRunOutput>,
    },

    // ─── Repository ───────────────────────────────────────────────────────────
    /// List all branch names in the repository.
    ListBranches,

    /// Look up a single branch.
    GetBranch { branch: String },

    /// Get a user's permission level on the repository.
    GetCollaboratorPermission { user: String },
}

impl GitHubEffect {
    /// The effect's serde tag, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            GitHubEffect::GetPr { .. } => "get_pr",
            GitHubEffect::ListPrCommits { .. } => "list_pr_commits",
            GitHubEffect::GetCommitPatch { .. } => "get_commit_patch",
            GitHubEffect::CreatePr { .. } => "create_pr",
            GitHubEffect::RequestReviewers { .. } => "request_reviewers",
            GitHubEffect::PostComment { .. } => "post_comment",
            GitHubEffect::ListComments { .. } => "list_comments",
            GitHubEffect::AddLabels { .. } => "add_labels",
            GitHubEffect::RemoveLabel { .. } => "remove_label",
            GitHubEffect::ListLabels { .. } => "list_labels",
            GitHubEffect::CreateCheckRun { .. } => "create_check_run",
            GitHubEffect::ListCheckRuns { .. } => "list_check_runs",
            GitHubEffect::UpdateCheckRun { .. } => "update_check_run",
            GitHubEffect::ListBranches => "list_branches",
            GitHubEffect::GetBranch { .. } => "get_branch",
            GitHubEffect::GetCollaboratorPermission { .. } => "get_collaborator_permission",
        }
    }
}

// ─── Response Types ───────────────────────────────────────────────────────────

/// A commit as listed on a PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    pub sha: Sha,
    /// Full commit message.
    pub message: String,
}

/// Comment data returned from the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentData {
    /// The comment ID.
    pub id: CommentId,
    /// The author's GitHub login.
    pub author: String,
    /// The comment body.
    pub body: String,
}

/// Check run data returned from the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunData {
    pub id: CheckRunId,
    pub name: String,
    pub status: CheckRunStatus,
    pub conclusion: Option<CheckConclusion>,
}

/// A branch and the commit at its tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchData {
    pub name: String,
    pub sha: Sha,
}

/// Response from a GitHub effect.
///
/// Each variant corresponds to the response from a particular effect type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GitHubResponse {
    /// Response to `GetPr`.
    Pr(PullRequest),

    /// Response to `ListPrCommits`.
    Commits(Vec<CommitData>),

    /// Response to `GetCommitPatch`.
    Patch(String),

    /// Response to `CreatePr`.
    PrCreated {
        /// The number of the new PR.
        number: PrNumber,
    },

    /// Response to `RequestReviewers`.
    ReviewersRequested,

    /// Response to `PostComment`.
    CommentPosted {
        /// The ID of the newly created comment.
        id: CommentId,
    },

    /// Response to `ListComments`.
    Comments(Vec<CommentData>),

    /// Response to `AddLabels`.
    LabelsAdded,

    /// Response to `RemoveLabel`.
    LabelRemoved {
        /// False if the PR did not carry the label (GitHub answered 404).
        was_present: bool,
    },

    /// Response to `ListLabels`.
    Labels(Vec<String>),

    /// Response to `CreateCheckRun`.
    CheckRunCreated { id: CheckRunId },

    /// Response to `ListCheckRuns`.
    CheckRuns(Vec<CheckRunData>),

    /// Response to `UpdateCheckRun`.
    CheckRunUpdated,

    /// Response to `ListBranches`.
    Branches(Vec<String>),

    /// Response to `GetBranch`; `None` if the branch does not exist.
    Branch(Option<BranchData>),

    /// Response to `GetCollaboratorPermission` (`admin`, `write`, `read`, `none`).
    Permission(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arb_branch_name, arb_pr_number, arb_sha};
    use crate::types::PrState;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash<T: Hash>(t: &T) -> u64 {
        let mut s = DefaultHasher::new();
        t.hash(&mut s);
        s.finish()
    }

    // ─── Arbitrary Generators ─────────────────────────────────────────────────

    fn arb_text() -> impl Strategy<Value = String> {
        ".{0,200}".prop_map(|s| s.to_string())
    }

    fn arb_login() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9-]{0,38}".prop_map(|s| s.to_string())
    }

    fn arb_check_run_status() -> impl Strategy<Value = CheckRunStatus> {
        prop_oneof![
            Just(CheckRunStatus::Queued),
            Just(CheckRunStatus::InProgress),
            Just(CheckRunStatus::Completed),
        ]
    }

    fn arb_conclusion() -> impl Strategy<Value = CheckConclusion> {
        prop_oneof![
            Just(CheckConclusion::Success),
            Just(CheckConclusion::Failure),
            Just(CheckConclusion::Neutral),
            Just(CheckConclusion::Cancelled),
            Just(CheckConclusion::ActionRequired),
        ]
    }

    fn arb_annotation() -> impl Strategy<Value = CheckAnnotation> {
        (
            "[a-z/]{1,30}\\.rs",
            1u32..10_000,
            0u32..50,
            arb_text(),
            proptest::option::of(arb_text()),
        )
            .prop_map(|(path, start_line, len, message, raw_details)| CheckAnnotation {
                path,
                start_line,
                end_line: start_line + len,
                annotation_level: AnnotationLevel::Failure,
                message,
                raw_details,
            })
    }

    fn arb_output() -> impl Strategy<Value = CheckRunOutput> {
        (
            arb_text(),
            arb_text(),
            prop::collection::vec(arb_annotation(), 0..5),
        )
            .prop_map(|(title, summary, annotations)| CheckRunOutput {
                title,
                summary,
                annotations,
            })
    }

    fn arb_pull_request() -> impl Strategy<Value = PullRequest> {
        let state = prop_oneof![
            Just(PrState::Open),
            Just(PrState::Closed),
            arb_sha().prop_map(|merge_commit_sha| PrState::Merged { merge_commit_sha }),
        ];
        (
            arb_pr_number(),
            arb_text(),
            proptest::option::of(arb_text()),
            arb_login(),
            arb_sha(),
            arb_branch_name(),
            arb_branch_name(),
            state,
            prop::collection::vec(arb_branch_name(), 0..4),
        )
            .prop_map(
                |(number, title, body, author, head_sha, head_ref, base_ref, state, labels)| {
                    PullRequest {
                        number,
                        title,
                        body,
                        author,
                        head_sha,
                        head_ref,
                        base_ref,
                        state,
                        labels,
                    }
                },
            )
    }

    fn arb_github_effect() -> impl Strategy<Value = GitHubEffect> {
        prop_oneof![
            arb_pr_number().prop_map(|pr| GitHubEffect::GetPr { pr }),
            arb_pr_number().prop_map(|pr| GitHubEffect::ListPrCommits { pr }),
            arb_sha().prop_map(|sha| GitHubEffect::GetCommitPatch { sha }),
            (arb_text(), arb_text(), arb_branch_name(), arb_branch_name()).prop_map(
                |(title, body, head, base)| GitHubEffect::CreatePr {
                    title,
                    body,
                    head,
                    base,
                }
            ),
            (arb_pr_number(), prop::collection::vec(arb_login(), 0..3))
                .prop_map(|(pr, reviewers)| GitHubEffect::RequestReviewers { pr, reviewers }),
            (arb_pr_number(), arb_text())
                .prop_map(|(pr, body)| GitHubEffect::PostComment { pr, body }),
            arb_pr_number().prop_map(|pr| GitHubEffect::ListComments { pr }),
            (arb_pr_number(), prop::collection::vec(arb_branch_name(), 1..4))
                .prop_map(|(pr, labels)| GitHubEffect::AddLabels { pr, labels }),
            (arb_pr_number(), arb_branch_name())
                .prop_map(|(pr, label)| GitHubEffect::RemoveLabel { pr, label }),
            arb_pr_number().prop_map(|pr| GitHubEffect::ListLabels { pr }),
            (arb_text(), arb_sha(), arb_check_run_status()).prop_map(|(name, head_sha, status)| {
                GitHubEffect::CreateCheckRun {
                    name,
                    head_sha,
                    status,
                }
            }),
            (arb_sha(), arb_text())
                .prop_map(|(head_sha, name)| GitHubEffect::ListCheckRuns { head_sha, name }),
            (
                any::<u64>(),
                arb_check_run_status(),
                proptest::option::of(arb_conclusion()),
                proptest::option::of(arb_output()),
            )
                .prop_map(|(id, status, conclusion, output)| GitHubEffect::UpdateCheckRun {
                    id: CheckRunId(id),
                    status,
                    conclusion,
                    output,
                }),
            Just(GitHubEffect::ListBranches),
            arb_branch_name().prop_map(|branch| GitHubEffect::GetBranch { branch }),
            arb_login().prop_map(|user| GitHubEffect::GetCollaboratorPermission { user }),
        ]
    }

    fn arb_github_response() -> impl Strategy<Value = GitHubResponse> {
        prop_oneof![
            arb_pull_request().prop_map(GitHubResponse::Pr),
            prop::collection::vec(
                (arb_sha(), arb_text()).prop_map(|(sha, message)| CommitData { sha, message }),
                0..5
            )
            .prop_map(GitHubResponse::Commits),
            arb_text().prop_map(GitHubResponse::Patch),
            arb_pr_number().prop_map(|number| GitHubResponse::PrCreated { number }),
            Just(GitHubResponse::ReviewersRequested),
            any::<u64>().prop_map(|id| GitHubResponse::CommentPosted { id: CommentId(id) }),
            prop::collection::vec(
                (any::<u64>(), arb_login(), arb_text()).prop_map(|(id, author, body)| {
                    CommentData {
                        id: CommentId(id),
                        author,
                        body,
                    }
                }),
                0..5
            )
            .prop_map(GitHubResponse::Comments),
            Just(GitHubResponse::LabelsAdded),
            any::<bool>().prop_map(|was_present| GitHubResponse::LabelRemoved { was_present }),
            prop::collection::vec(arb_branch_name(), 0..5).prop_map(GitHubResponse::Labels),
            any::<u64>().prop_map(|id| GitHubResponse::CheckRunCreated { id: CheckRunId(id) }),
            prop::collection::vec(
                (
                    any::<u64>(),
                    arb_text(),
                    arb_check_run_status(),
                    proptest::option::of(arb_conclusion())
                )
                    .prop_map(|(id, name, status, conclusion)| CheckRunData {
                        id: CheckRunId(id),
                        name,
                        status,
                        conclusion,
                    }),
                0..3
            )
            .prop_map(GitHubResponse::CheckRuns),
            Just(GitHubResponse::CheckRunUpdated),
            prop::collection::vec(arb_branch_name(), 0..5).prop_map(GitHubResponse::Branches),
            proptest::option::of(
                (arb_branch_name(), arb_sha()).prop_map(|(name, sha)| BranchData { name, sha })
            )
            .prop_map(GitHubResponse::Branch),
            prop_oneof![Just("admin"), Just("write"), Just("read"), Just("none")]
                .prop_map(|p| GitHubResponse::Permission(p.to_string())),
        ]
    }

    mod github_effect {
        use super::*;

        proptest! {
            #[test]
            fn serde_roundtrip(effect in arb_github_effect()) {
                let json = serde_json::to_string(&effect).unwrap();
                let parsed: GitHubEffect = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(effect, parsed);
            }

            #[test]
            fn eq_implies_same_hash(e1 in arb_github_effect(), e2 in arb_github_effect()) {
                if e1 == e2 {
                    prop_assert_eq!(hash(&e1), hash(&e2));
                }
            }

            #[test]
            fn name_is_the_serde_tag(effect in arb_github_effect()) {
                let json = serde_json::to_value(&effect).unwrap();
                prop_assert_eq!(json["type"].as_str(), Some(effect.name()));
            }
        }

        #[test]
        fn effects_are_tagged_by_type() {
            let json = serde_json::to_value(GitHubEffect::RemoveLabel {
                pr: PrNumber(7),
                label: "target/8-x-y".to_string(),
            })
            .unwrap();
            assert_eq!(json["type"], "remove_label");
            assert_eq!(json["pr"], 7);
        }
    }

    mod github_response {
        use super::*;

        proptest! {
            #[test]
            fn serde_roundtrip(response in arb_github_response()) {
                let json = serde_json::to_string(&response).unwrap();
                let parsed: GitHubResponse = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(response, parsed);
            }
        }
    }

    #[test]
    fn api_strings() {
        assert_eq!(CheckRunStatus::InProgress.as_api_str(), "in_progress");
        assert_eq!(CheckConclusion::ActionRequired.as_api_str(), "action_required");
        assert_eq!(
            serde_json::to_value(AnnotationLevel::Failure).unwrap(),
            "failure"
        );
    }

    #[test]
    fn annotation_omits_missing_raw_details() {
        let annotation = CheckAnnotation {
            path: "src/lib.rs".to_string(),
            start_line: 3,
            end_line: 9,
            annotation_level: AnnotationLevel::Failure,
            message: "Patch conflict in src/lib.rs".to_string(),
            raw_details: None,
        };
        let json = serde_json::to_value(&annotation).unwrap();
        assert!(json.get("raw_details").is_none());
        assert_eq!(json["annotation_level"], "failure");
    }
}
