//! Backport state tracked through labels on the original PR.
//!
//! [`labels`] and [`transitions`] are pure: they encode phases as labels and
//! validate moves between them. [`machine`] executes transitions through the
//! GitHub interpreter.

pub mod labels;
pub mod machine;
pub mod transitions;

pub use labels::{BackportTarget, LabelPhase, LabelPrefixes};
pub use machine::{BackportStateMachine, StateError};
pub use transitions::{
    BackportEvent, LabelPlan, Transition, TransitionError, next_phase, plan_labels,
};
