//! Work-item status state machine.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkItemError;

/// Authoritative status of a work item.
///
/// ```text
/// Created ──┐
///           ├──> Claimed ──> Processed   (one-shot success, terminal)
/// Active  ──┘       │  └───> Rejected    (invalid input, terminal)
///    ^              │  └───> Failed      (threshold reached, terminal)
///    └──────────────┘                    (retryable failure / recurring success)
/// ```
///
/// `Claimed` is never persisted: a claimed row keeps its stored status and is
/// protected by the store's row lock for the life of the attempt. Items handed
/// out by a claim carry `Claimed` so the outcome transition can be checked.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Newly produced; first attempt pending.
    Created,
    /// Eligible for claiming (recurring items, or one-shot items awaiting retry).
    Active,
    /// Held by a claim for the duration of one attempt.
    Claimed,
    /// One-shot item completed successfully.
    Processed,
    /// Processor judged the item invalid; never retried.
    Rejected,
    /// Failure threshold reached; requires manual intervention.
    Failed,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 6] = [
        WorkStatus::Created,
        WorkStatus::Active,
        WorkStatus::Claimed,
        WorkStatus::Processed,
        WorkStatus::Rejected,
        WorkStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Created => "created",
            WorkStatus::Active => "active",
            WorkStatus::Claimed => "claimed",
            WorkStatus::Processed => "processed",
            WorkStatus::Rejected => "rejected",
            WorkStatus::Failed => "failed",
        }
    }

    /// No automatic transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkStatus::Processed | WorkStatus::Rejected | WorkStatus::Failed
        )
    }

    /// Statuses a claim may select from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, WorkStatus::Created | WorkStatus::Active)
    }

    pub fn can_transition_to(&self, next: WorkStatus) -> bool {
        use WorkStatus::*;
        matches!(
            (self, next),
            (Created, Claimed)
                | (Created, Active)
                | (Active, Claimed)
                | (Claimed, Active)
                | (Claimed, Processed)
                | (Claimed, Rejected)
                | (Claimed, Failed)
        )
    }

    /// Validate a transition, returning the target status.
    pub fn transition(self, next: WorkStatus) -> Result<WorkStatus, WorkItemError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(WorkItemError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = WorkItemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| WorkItemError::UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_outgoing_transitions() {
        for from in WorkStatus::ALL.into_iter().filter(WorkStatus::is_terminal) {
            for to in WorkStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn only_claimed_reaches_outcome_statuses() {
        for to in [WorkStatus::Processed, WorkStatus::Rejected, WorkStatus::Failed] {
            for from in WorkStatus::ALL {
                assert_eq!(from.can_transition_to(to), from == WorkStatus::Claimed);
            }
        }
    }

    #[test]
    fn claimed_cannot_be_reclaimed() {
        let err = WorkStatus::Claimed
            .transition(WorkStatus::Claimed)
            .unwrap_err();
        assert_eq!(
            err,
            WorkItemError::InvalidTransition {
                from: WorkStatus::Claimed,
                to: WorkStatus::Claimed,
            }
        );
    }

    #[test]
    fn created_is_never_reentered() {
        for from in WorkStatus::ALL {
            assert!(!from.can_transition_to(WorkStatus::Created));
        }
    }

    #[test]
    fn string_form_parses_back() {
        for status in WorkStatus::ALL {
            assert_eq!(status.as_str().parse::<WorkStatus>().unwrap(), status);
        }
        assert!(matches!(
            "pending".parse::<WorkStatus>(),
            Err(WorkItemError::UnknownStatus(_))
        ));
    }
}
