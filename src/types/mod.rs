//! Core domain types for the backport bot.

pub mod ids;
pub mod pr;

pub use ids::{CheckRunId, CommentId, InvalidSha, InvalidSlug, PrNumber, RepoSlug, Sha};
pub use pr::{PrState, PullRequest};
