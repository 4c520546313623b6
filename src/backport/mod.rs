//! Backporting a pull request onto a release branch.
//!
//! - [`engine`] builds the backport branch from patches
//! - [`runner`] schedules jobs and reports their outcome on GitHub

pub mod engine;
pub mod error;
pub mod runner;

pub use engine::{
    AppliedBackport, BackportRequest, BackportStrategy, PatchBackportEngine, PatchSource,
};
pub use error::BackportError;
pub use runner::{BackportPurpose, BackportRunner, failure_comment, job_identifier, temp_branch_name};
