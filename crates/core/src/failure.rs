//! Failure accounting applied after every processing attempt.
//!
//! One policy for every job kind: success clears the failure counters,
//! transient failures count towards a threshold, and reaching the threshold
//! disables the item. What a disabled item means for its kind is the
//! processor's business, not the queue's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkItemError;
use crate::item::WorkItem;
use crate::outcome::AttemptOutcome;
use crate::status::WorkStatus;

/// Failures tolerated before an item is disabled.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Resulting state change from recording one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// One-shot item finished.
    Completed,
    /// Recurring item re-armed.
    Rescheduled { due_at: DateTime<Utc> },
    /// Failure below threshold; item stays claimable.
    RetryScheduled { failure_count: u32 },
    /// Threshold reached; item is terminal.
    Disabled { failure_count: u32 },
    /// Processor rejected the input; item is terminal.
    Rejected,
}

/// Failure-count threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    pub threshold: u32,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl FailurePolicy {
    pub fn new(threshold: u32) -> Result<Self, WorkItemError> {
        if threshold == 0 {
            return Err(WorkItemError::validation("failure threshold must be at least 1"));
        }
        Ok(Self { threshold })
    }

    /// Record the outcome of the attempt on a claimed item.
    ///
    /// The item must be `Claimed`. For recurring kinds a success with
    /// `next_due_at` moves the due time; without one the due time is kept.
    pub fn record_outcome(
        &self,
        item: &mut WorkItem,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkItemError> {
        if item.status != WorkStatus::Claimed {
            return Err(WorkItemError::InvalidTransition {
                from: item.status,
                to: outcome_target(item, outcome, self.threshold),
            });
        }

        let transition = match outcome {
            AttemptOutcome::Succeeded { next_due_at } => {
                item.failure_count = 0;
                item.last_error = None;
                item.last_success_at = Some(now);
                item.last_attempt_at = Some(now);

                if item.kind.is_recurring() {
                    item.transition(WorkStatus::Active)?;
                    if let Some(due_at) = next_due_at {
                        item.due_at = *due_at;
                    }
                    Transition::Rescheduled {
                        due_at: item.due_at,
                    }
                } else {
                    item.transition(WorkStatus::Processed)?;
                    Transition::Completed
                }
            }
            AttemptOutcome::Failed(detail) => {
                item.failure_count = item.failure_count.saturating_add(1);
                item.last_error = Some(detail.clone());
                item.last_attempt_at = Some(now);

                if item.failure_count >= self.threshold {
                    item.transition(WorkStatus::Failed)?;
                    Transition::Disabled {
                        failure_count: item.failure_count,
                    }
                } else {
                    item.transition(WorkStatus::Active)?;
                    Transition::RetryScheduled {
                        failure_count: item.failure_count,
                    }
                }
            }
            AttemptOutcome::Rejected(reason) => {
                item.last_error = Some(reason.clone());
                item.last_attempt_at = Some(now);
                item.transition(WorkStatus::Rejected)?;
                Transition::Rejected
            }
        };

        Ok(transition)
    }
}

fn outcome_target(item: &WorkItem, outcome: &AttemptOutcome, threshold: u32) -> WorkStatus {
    match outcome {
        AttemptOutcome::Succeeded { .. } if item.kind.is_recurring() => WorkStatus::Active,
        AttemptOutcome::Succeeded { .. } => WorkStatus::Processed,
        AttemptOutcome::Failed(_) if item.failure_count.saturating_add(1) >= threshold => {
            WorkStatus::Failed
        }
        AttemptOutcome::Failed(_) => WorkStatus::Active,
        AttemptOutcome::Rejected(_) => WorkStatus::Rejected,
    }
}
