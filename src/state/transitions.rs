//! Phase transitions for the backport label state machine.
//!
//! Pure functions: given the current phase of a backport and an event, compute
//! the next phase and which labels to change.

use serde::{Deserialize, Serialize};

use super::labels::{LabelPhase, LabelPrefixes};

/// Something that happened to a backport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackportEvent {
    /// The bot opened a backport PR.
    BackportOpened,
    /// The bot could not produce a backport.
    BackportFailed,
    /// The backport PR was closed without merging.
    BackportClosedUnmerged,
    /// The backport PR was merged.
    BackportMerged,
    /// Someone opened a backport PR by hand.
    ManualBackportOpened,
}

impl BackportEvent {
    /// The phase this event leads to.
    pub fn destination(self) -> LabelPhase {
        match self {
            BackportEvent::BackportOpened | BackportEvent::ManualBackportOpened => {
                LabelPhase::InFlight
            }
            BackportEvent::BackportFailed | BackportEvent::BackportClosedUnmerged => {
                LabelPhase::NeedsManual
            }
            BackportEvent::BackportMerged => LabelPhase::Merged,
        }
    }

    fn allowed_from(self, current: Option<LabelPhase>) -> bool {
        use LabelPhase::*;
        match self {
            BackportEvent::BackportOpened => matches!(current, None | Some(Target)),
            BackportEvent::BackportFailed => matches!(current, Some(Target | InFlight)),
            BackportEvent::BackportClosedUnmerged | BackportEvent::BackportMerged => {
                current == Some(InFlight)
            }
            BackportEvent::ManualBackportOpened => {
                matches!(current, None | Some(Target | NeedsManual))
            }
        }
    }
}

/// A validated move between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<LabelPhase>,
    pub to: LabelPhase,
}

impl Transition {
    /// True when the event was already applied.
    pub fn is_noop(&self) -> bool {
        self.from == Some(self.to)
    }
}

/// Error returned when an event is not valid in the current phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    InvalidTransition {
        from: Option<LabelPhase>,
        event: BackportEvent,
    },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::InvalidTransition {
                from: Some(from),
                event,
            } => write!(f, "Invalid transition from {} on {:?}", from, event),
            TransitionError::InvalidTransition { from: None, event } => {
                write!(f, "Invalid transition from unlabelled on {:?}", event)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// Computes the next phase for `event`.
///
/// | from                    | event                  | to          |
/// |-------------------------|------------------------|-------------|
/// | Target / none           | BackportOpened         | InFlight    |
/// | Target / InFlight       | BackportFailed         | NeedsManual |
/// | InFlight                | BackportClosedUnmerged | NeedsManual |
/// | InFlight                | BackportMerged         | Merged      |
/// | NeedsManual/Target/none | ManualBackportOpened   | InFlight    |
///
/// An event whose destination is already current is a no-op.
pub fn next_phase(
    current: Option<LabelPhase>,
    event: BackportEvent,
) -> Result<Transition, TransitionError> {
    let to = event.destination();
    if current == Some(to) || event.allowed_from(current) {
        Ok(Transition { from: current, to })
    } else {
        Err(TransitionError::InvalidTransition {
            from: current,
            event,
        })
    }
}

/// Label changes that carry out a transition on one PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPlan {
    pub transition: Transition,
    /// Phase labels for the branch that must go.
    pub remove: Vec<String>,
    /// The destination label, unless already present.
    pub add: Option<String>,
}

impl LabelPlan {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_none()
    }
}

/// Plans the label edits for `event` on a PR currently carrying `labels`.
///
/// Every other phase label for `branch` is removed, so after the plan runs the
/// PR carries exactly one phase label for the branch. A no-op transition
/// plans nothing.
pub fn plan_labels(
    prefixes: &LabelPrefixes,
    labels: &[String],
    branch: &str,
    event: BackportEvent,
) -> Result<LabelPlan, TransitionError> {
    let transition = next_phase(prefixes.current_phase(labels, branch), event)?;
    if transition.is_noop() {
        return Ok(LabelPlan {
            transition,
            remove: Vec::new(),
            add: None,
        });
    }

    let remove = prefixes
        .labels_for_branch(labels, branch)
        .filter(|(_, phase)| *phase != transition.to)
        .map(|(label, _)| label.clone())
        .collect();
    let wanted = prefixes.render(transition.to, branch);
    let add = (!labels.contains(&wanted)).then_some(wanted);

    Ok(LabelPlan {
        transition,
        remove,
        add,
    })
}
