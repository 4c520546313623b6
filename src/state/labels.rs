//! Label-prefix encoding of backport state.
//!
//! The state of a backport to branch `B` is carried on the original PR as a
//! label `<prefix>B`, where the prefix names the phase (`target/8-x-y`,
//! `in-flight/8-x-y`, ...). A PR can carry labels for several branches at once.

use serde::{Deserialize, Serialize};

/// Phase of a backport to one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPhase {
    /// A backport has been requested.
    Target,
    /// A backport PR is open.
    InFlight,
    /// The backport PR was merged.
    Merged,
    /// Automatic backport failed; someone has to do it by hand.
    NeedsManual,
}

impl LabelPhase {
    pub const ALL: [LabelPhase; 4] = [
        LabelPhase::Target,
        LabelPhase::InFlight,
        LabelPhase::Merged,
        LabelPhase::NeedsManual,
    ];

    /// Rank used when a PR carries several phase labels for the same branch.
    ///
    /// Merged > InFlight > NeedsManual > Target.
    pub fn precedence(self) -> u8 {
        match self {
            LabelPhase::Target => 0,
            LabelPhase::NeedsManual => 1,
            LabelPhase::InFlight => 2,
            LabelPhase::Merged => 3,
        }
    }
}

impl std::fmt::Display for LabelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LabelPhase::Target => "target",
            LabelPhase::InFlight => "in-flight",
            LabelPhase::Merged => "merged",
            LabelPhase::NeedsManual => "needs-manual",
        };
        f.write_str(name)
    }
}

/// A branch and the phase its backport is in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackportTarget {
    pub branch: String,
    pub phase: LabelPhase,
}

/// Label prefixes, one per phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPrefixes {
    pub target: String,
    pub in_flight: String,
    pub merged: String,
    pub needs_manual: String,
}

impl Default for LabelPrefixes {
    fn default() -> Self {
        Self {
            target: "target/".to_string(),
            in_flight: "in-flight/".to_string(),
            merged: "merged/".to_string(),
            needs_manual: "needs-manual/".to_string(),
        }
    }
}

impl LabelPrefixes {
    pub fn prefix(&self, phase: LabelPhase) -> &str {
        match phase {
            LabelPhase::Target => &self.target,
            LabelPhase::InFlight => &self.in_flight,
            LabelPhase::Merged => &self.merged,
            LabelPhase::NeedsManual => &self.needs_manual,
        }
    }

    /// True if every prefix is non-empty and none is a prefix of another, so
    /// each label parses to at most one phase.
    pub fn is_unambiguous(&self) -> bool {
        LabelPhase::ALL.iter().all(|&a| {
            let pa = self.prefix(a);
            !pa.is_empty()
                && LabelPhase::ALL
                    .iter()
                    .filter(|&&b| b != a)
                    .all(|&b| !pa.starts_with(self.prefix(b)))
        })
    }

    /// The label marking `branch` as being in `phase`.
    pub fn render(&self, phase: LabelPhase, branch: &str) -> String {
        format!("{}{}", self.prefix(phase), branch)
    }

    /// Parses a phase label; `None` for labels that aren't phase labels.
    pub fn parse(&self, label: &str) -> Option<BackportTarget> {
        LabelPhase::ALL.iter().find_map(|&phase| {
            let branch = label.strip_prefix(self.prefix(phase))?;
            (!branch.is_empty()).then(|| BackportTarget {
                branch: branch.to_string(),
                phase,
            })
        })
    }

    /// All phase labels in `labels` that refer to `branch`.
    pub fn labels_for_branch<'a>(
        &'a self,
        labels: &'a [String],
        branch: &'a str,
    ) -> impl Iterator<Item = (&'a String, LabelPhase)> + 'a {
        labels.iter().filter_map(move |label| {
            self.parse(label)
                .filter(|target| target.branch == branch)
                .map(|target| (label, target.phase))
        })
    }

    /// The phase of the backport to `branch`, picking the highest-precedence
    /// label if several are present.
    pub fn current_phase(&self, labels: &[String], branch: &str) -> Option<LabelPhase> {
        self.labels_for_branch(labels, branch)
            .map(|(_, phase)| phase)
            .max_by_key(|phase| phase.precedence())
    }
}
