//! Backport Bot - A GitHub bot that backports merged pull requests onto
//! supported release branches.
//!
//! Jobs flow through a bounded [`queue`], get a working copy from the
//! [`git`] cache, are applied by the [`backport`] engine and reported on
//! GitHub, where [`state`] tracks each backport through labels.

pub mod backport;
pub mod branches;
pub mod config;
pub mod effects;
pub mod git;
pub mod github;
pub mod messages;
pub mod queue;
pub mod references;
pub mod server;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
