//! The work-item record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkItemError;
use crate::id::WorkItemId;
use crate::kind::JobKind;
use crate::status::WorkStatus;

/// A unit of deferred work persisted in the store.
///
/// The `payload` is opaque to the queue: only the kind's processor interprets
/// it. `due_at` is the scheduling key claims order by (for payment-bot items it
/// holds the source cast's timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub kind: JobKind,
    pub status: WorkStatus,
    /// Source-event key, unique per kind when present.
    pub dedupe_key: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub failure_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Optimistic-concurrency token, bumped by the store on every update.
    pub version: u64,
}

impl WorkItem {
    /// Due and in a claimable status.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.due_at <= now
    }

    /// Claim ordering key: oldest due time first, ties by id.
    pub fn scheduling_key(&self) -> (DateTime<Utc>, WorkItemId) {
        (self.due_at, self.id)
    }

    /// Move to `next`, enforcing the state machine.
    pub fn transition(&mut self, next: WorkStatus) -> Result<(), WorkItemError> {
        self.status = self.status.transition(next)?;
        Ok(())
    }

    /// Mark as held by a claim.
    pub fn mark_claimed(&mut self) -> Result<(), WorkItemError> {
        self.transition(WorkStatus::Claimed)
    }
}

/// Producer request for a new work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub due_at: DateTime<Utc>,
    pub dedupe_key: Option<String>,
}

impl NewWorkItem {
    pub fn new(kind: JobKind, payload: serde_json::Value, due_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            payload,
            due_at,
            dedupe_key: None,
        }
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Build the stored record in the kind's initial status.
    pub fn into_item(self, id: WorkItemId, now: DateTime<Utc>) -> Result<WorkItem, WorkItemError> {
        if let Some(key) = &self.dedupe_key {
            if key.trim().is_empty() {
                return Err(WorkItemError::validation("dedupe key must not be blank"));
            }
        }

        Ok(WorkItem {
            id,
            kind: self.kind,
            status: self.kind.initial_status(),
            dedupe_key: self.dedupe_key,
            payload: self.payload,
            created_at: now,
            due_at: self.due_at,
            failure_count: 0,
            last_attempt_at: None,
            last_success_at: None,
            last_error: None,
            version: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_item(kind: JobKind, due_at: DateTime<Utc>) -> WorkItem {
        NewWorkItem::new(kind, serde_json::json!({}), due_at)
            .into_item(WorkItemId::new(), Utc::now())
            .unwrap()
    }

    #[test]
    fn new_item_starts_in_kind_initial_status() {
        let now = Utc::now();
        assert_eq!(new_item(JobKind::PaymentBot, now).status, WorkStatus::Created);
        assert_eq!(new_item(JobKind::StorageCheck, now).status, WorkStatus::Active);

        let item = new_item(JobKind::RewardSchedule, now);
        assert_eq!(item.failure_count, 0);
        assert_eq!(item.version, 0);
        assert!(item.last_error.is_none());
    }

    #[test]
    fn future_items_are_not_due() {
        let now = Utc::now();
        let item = new_item(JobKind::StorageCheck, now + Duration::minutes(5));
        assert!(!item.is_due(now));
        assert!(item.is_due(now + Duration::minutes(5)));
    }

    #[test]
    fn claimed_items_are_not_due() {
        let now = Utc::now();
        let mut item = new_item(JobKind::PaymentBot, now);
        item.mark_claimed().unwrap();
        assert!(!item.is_due(now));
        assert!(item.mark_claimed().is_err());
    }

    #[test]
    fn blank_dedupe_key_is_rejected() {
        let err = NewWorkItem::new(JobKind::PaymentBot, serde_json::json!({}), Utc::now())
            .with_dedupe_key("  ")
            .into_item(WorkItemId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WorkItemError::Validation(_)));
    }
}
