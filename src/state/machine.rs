//! Applies backport events to pull requests on GitHub.
//!
//! [`super::transitions`] decides what should change; this module reads the
//! current labels, executes the plan, and posts the accompanying comments.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::effects::GitHubInterpreter;
use crate::github::{GitHubApiError, GitHubOps};
use crate::messages;
use crate::references::{backport_references, first_backport_reference};
use crate::types::{PrNumber, PullRequest};

use super::labels::{LabelPhase, LabelPrefixes};
use super::transitions::{BackportEvent, Transition, TransitionError, next_phase, plan_labels};

/// Errors from applying a backport event.
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    GitHub(#[from] GitHubApiError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Drives the label lifecycle of backports on original PRs.
pub struct BackportStateMachine<G> {
    github: Arc<G>,
    prefixes: LabelPrefixes,
    bot_login: String,
}

impl<G> std::fmt::Debug for BackportStateMachine<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackportStateMachine")
            .field("prefixes", &self.prefixes)
            .field("bot_login", &self.bot_login)
            .finish_non_exhaustive()
    }
}

impl<G> BackportStateMachine<G>
where
    G: GitHubInterpreter<Error = GitHubApiError> + Send + Sync,
{
    pub fn new(github: Arc<G>, prefixes: LabelPrefixes, bot_login: impl Into<String>) -> Self {
        Self {
            github,
            prefixes,
            bot_login: bot_login.into(),
        }
    }

    pub fn prefixes(&self) -> &LabelPrefixes {
        &self.prefixes
    }

    fn ops(&self) -> GitHubOps<'_, G> {
        GitHubOps::new(self.github.as_ref())
    }

    /// Applies `event` to the backport of `pr` to `branch`.
    ///
    /// Label removals are best effort: a label that is already gone is fine,
    /// and other removal failures are logged. Adding the destination label
    /// must succeed.
    #[instrument(skip(self), fields(pr = %pr))]
    pub async fn apply(
        &self,
        pr: PrNumber,
        branch: &str,
        event: BackportEvent,
    ) -> Result<Transition, StateError> {
        let labels = self.ops().labels(pr).await?;
        let plan = plan_labels(&self.prefixes, &labels, branch, event)?;

        if plan.transition.is_noop() {
            debug!(phase = %plan.transition.to, "Event already applied");
            return Ok(plan.transition);
        }

        for label in &plan.remove {
            match self.ops().remove_label(pr, label.as_str()).await {
                Ok(true) => {}
                Ok(false) => debug!(label = %label, "Label already removed"),
                Err(e) => warn!(label = %label, error = %e, "Failed to remove label"),
            }
        }
        if let Some(label) = plan.add {
            self.ops().add_labels(pr, vec![label]).await?;
        }

        info!(
            from = ?plan.transition.from,
            to = %plan.transition.to,
            "Backport state changed"
        );
        Ok(plan.transition)
    }

    /// Checks that `event` is valid for the backport of `pr` to `branch`
    /// without changing any labels.
    pub async fn validate(
        &self,
        pr: PrNumber,
        branch: &str,
        event: BackportEvent,
    ) -> Result<Transition, StateError> {
        let labels = self.ops().labels(pr).await?;
        let current = self.prefixes.current_phase(&labels, branch);
        Ok(next_phase(current, event)?)
    }

    /// Marks `branch` as a requested target of `pr` unless the PR already
    /// carries a phase label for it.
    pub async fn ensure_target(&self, pr: PrNumber, branch: &str) -> Result<(), StateError> {
        let labels = self.ops().labels(pr).await?;
        if self.prefixes.current_phase(&labels, branch).is_none() {
            let label = self.prefixes.render(LabelPhase::Target, branch);
            self.ops().add_labels(pr, vec![label]).await?;
        }
        Ok(())
    }

    /// The bot opened `backport` for `original`.
    pub async fn on_backport_opened(
        &self,
        original: PrNumber,
        branch: &str,
        backport: PrNumber,
    ) -> Result<Transition, StateError> {
        let transition = self
            .apply(original, branch, BackportEvent::BackportOpened)
            .await?;
        self.post_once(original, &messages::backport_opened(branch, backport))
            .await?;
        Ok(transition)
    }

    /// The bot could not backport `original`; `comment` explains why.
    pub async fn on_backport_failed(
        &self,
        original: PrNumber,
        branch: &str,
        comment: &str,
    ) -> Result<Transition, StateError> {
        let transition = self
            .apply(original, branch, BackportEvent::BackportFailed)
            .await?;
        self.post_once(original, comment).await?;
        Ok(transition)
    }

    /// A backport PR was closed, merged or not.
    ///
    /// `closed_by` is the login that closed it. The bot closing its own PR
    /// (superseded by a newer attempt) is not a failure. Returns `None` if
    /// the PR is not a backport or the event needs no transition.
    #[instrument(skip(self, backport), fields(pr = %backport.number))]
    pub async fn on_backport_pr_closed(
        &self,
        backport: &PullRequest,
        closed_by: &str,
    ) -> Result<Option<Transition>, StateError> {
        let Some(original) = first_backport_reference(backport.body_text()) else {
            debug!("Closed PR is not a backport");
            return Ok(None);
        };

        let event = if backport.state.is_merged() {
            BackportEvent::BackportMerged
        } else if closed_by == self.bot_login {
            debug!("Backport closed by the bot itself");
            return Ok(None);
        } else {
            BackportEvent::BackportClosedUnmerged
        };

        let transition = self.apply(original, &backport.base_ref, event).await?;
        Ok(Some(transition))
    }

    /// Someone opened `manual`, a backport PR not created by the bot.
    ///
    /// Every PR referenced by its body moves to in-flight for the manual PR's
    /// base branch and gets one cross-link comment.
    #[instrument(skip(self, manual), fields(pr = %manual.number))]
    pub async fn on_manual_backport_opened(
        &self,
        manual: &PullRequest,
    ) -> Result<Vec<Transition>, StateError> {
        if manual.author == self.bot_login {
            return Ok(Vec::new());
        }

        let mut originals = backport_references(manual.body_text());
        originals.sort();
        originals.dedup();

        let mut transitions = Vec::new();
        for original in originals {
            let transition = self
                .apply(original, &manual.base_ref, BackportEvent::ManualBackportOpened)
                .await?;
            let comment =
                messages::manual_backport_opened(&manual.author, &manual.base_ref, manual.number);
            self.post_once(original, &comment).await?;
            transitions.push(transition);
        }
        Ok(transitions)
    }

    /// Posts `body` on `pr` unless an identical comment is already there.
    ///
    /// Returns true if a comment was posted.
    async fn post_once(&self, pr: PrNumber, body: &str) -> Result<bool, GitHubApiError> {
        let comments = self.ops().comments(pr).await?;
        if comments.iter().any(|c| c.body == body) {
            debug!(pr = %pr, "Identical comment already posted");
            return Ok(false);
        }
        self.ops().post_comment(pr, body).await?;
        Ok(true)
    }
}
