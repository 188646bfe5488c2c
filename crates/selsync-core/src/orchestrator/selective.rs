//! Selective-sync check on an untouched sibling resource.

use serde::Serialize;

use crate::types::Status;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum SelectiveSync {
    /// No control resource was configured.
    NotChecked,
    /// The control resource kept its revision and replica count.
    Held,
    Violated { before: Status, after: Status },
    /// A value was unknown on one side of the comparison.
    Inconclusive { reason: String },
}

impl SelectiveSync {
    pub fn check(before: &Status, after: &Status) -> Self {
        let revisions = (&before.observed_revision, &after.observed_revision);
        let replicas = (before.observed_replica_count, after.observed_replica_count);
        let (Some(rev_before), Some(rev_after)) = revisions else {
            return Self::Inconclusive {
                reason: "control revision unknown".to_string(),
            };
        };
        let (Some(rep_before), Some(rep_after)) = replicas else {
            return Self::Inconclusive {
                reason: "control replica count unknown".to_string(),
            };
        };
        if rev_before == rev_after && rep_before == rep_after {
            Self::Held
        } else {
            Self::Violated {
                before: before.clone(),
                after: after.clone(),
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotChecked => "not-checked",
            Self::Held => "held",
            Self::Violated { .. } => "violated",
            Self::Inconclusive { .. } => "inconclusive",
        }
    }

    /// Warning to report, if the check did not hold.
    pub fn warning(&self, control: &str) -> Option<String> {
        match self {
            Self::NotChecked | Self::Held => None,
            Self::Violated { before, after } => Some(format!(
                "control resource {} changed: before [{}] after [{}]",
                control, before, after
            )),
            Self::Inconclusive { reason } => Some(format!(
                "selective-sync check on {} inconclusive: {}",
                control, reason
            )),
        }
    }
}
