//! Job kinds sharing the claim queue.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkItemError;
use crate::status::WorkStatus;

/// Whether a successful attempt finishes the item or re-arms it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// Success is terminal (`Processed`).
    OneShot,
    /// Success returns the item to `Active` with a new due time.
    Recurring,
}

/// The background job kinds backed by the work-item table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Inbound payment-bot casts; ordered by the cast's `casted_at`.
    PaymentBot,
    /// Per-user on-chain storage usage monitoring.
    StorageCheck,
    /// Scheduled reward disbursement.
    RewardSchedule,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::PaymentBot,
        JobKind::StorageCheck,
        JobKind::RewardSchedule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PaymentBot => "payment_bot",
            JobKind::StorageCheck => "storage_check",
            JobKind::RewardSchedule => "reward_schedule",
        }
    }

    /// Upper-case form used in environment variable names.
    pub fn env_key(&self) -> &'static str {
        match self {
            JobKind::PaymentBot => "PAYMENT_BOT",
            JobKind::StorageCheck => "STORAGE_CHECK",
            JobKind::RewardSchedule => "REWARD_SCHEDULE",
        }
    }

    pub fn recurrence(&self) -> Recurrence {
        match self {
            JobKind::PaymentBot => Recurrence::OneShot,
            JobKind::StorageCheck | JobKind::RewardSchedule => Recurrence::Recurring,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence() == Recurrence::Recurring
    }

    /// Status assigned by producers at insert.
    pub fn initial_status(&self) -> WorkStatus {
        match self.recurrence() {
            Recurrence::OneShot => WorkStatus::Created,
            Recurrence::Recurring => WorkStatus::Active,
        }
    }

    /// Statuses the runner claims from on each tick.
    pub fn claim_filter(&self) -> &'static [WorkStatus] {
        &[WorkStatus::Created, WorkStatus::Active]
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = WorkItemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| WorkItemError::UnknownKind(s.to_string()))
    }
}
