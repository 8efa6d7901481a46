//! Per-kind enqueue front for external producers.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use claimq_core::{JobKind, JobPayload, NewWorkItem, WorkItem, WorkItemError};

use crate::store::{StoreError, WorkItemStore};

/// Inserts work items of one kind.
///
/// Items start `Created` (one-shot kinds) or `Active` (recurring kinds).
#[derive(Debug, Clone)]
pub struct Producer<S> {
    store: S,
    kind: JobKind,
}

impl<S: WorkItemStore> Producer<S> {
    pub fn new(store: S, kind: JobKind) -> Self {
        Self { store, kind }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Enqueue a raw payload. A repeated `dedupe_key` for this kind fails
    /// with [`StoreError::Duplicate`].
    #[instrument(skip(self, payload), fields(kind = %self.kind), err)]
    pub async fn enqueue(
        &self,
        payload: serde_json::Value,
        due_at: DateTime<Utc>,
        dedupe_key: Option<String>,
    ) -> Result<WorkItem, StoreError> {
        let mut new = NewWorkItem::new(self.kind, payload, due_at);
        new.dedupe_key = dedupe_key;

        let item = self.store.insert(new).await?;
        debug!(id = %item.id, status = %item.status, due_at = %item.due_at, "enqueued work item");
        Ok(item)
    }

    /// Enqueue a typed payload, keyed by its own dedupe key.
    pub async fn enqueue_typed<P: JobPayload>(
        &self,
        payload: &P,
        due_at: DateTime<Utc>,
    ) -> Result<WorkItem, StoreError> {
        if P::KIND != self.kind {
            return Err(StoreError::Domain(WorkItemError::validation(format!(
                "{} payload sent to {} producer",
                P::KIND,
                self.kind
            ))));
        }
        self.enqueue(payload.to_payload()?, due_at, Some(payload.dedupe_key()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimq_core::{CastSnapshot, RewardCriteria, WorkStatus};

    use crate::store::InMemoryWorkItemStore;

    fn cast(hash: &str) -> CastSnapshot {
        CastSnapshot {
            hash: hash.to_string(),
            author_fid: 42,
            text: "@paybot send 5 to @alice".to_string(),
            parent_hash: None,
            casted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn one_shot_items_start_created_and_recurring_start_active() {
        let store = InMemoryWorkItemStore::new();

        let payment = Producer::new(store.clone(), JobKind::PaymentBot)
            .enqueue(serde_json::json!({}), Utc::now(), None)
            .await
            .unwrap();
        let storage = Producer::new(store.clone(), JobKind::StorageCheck)
            .enqueue(serde_json::json!({}), Utc::now(), None)
            .await
            .unwrap();

        assert_eq!(payment.status, WorkStatus::Created);
        assert_eq!(storage.status, WorkStatus::Active);
        assert_eq!(payment.failure_count, 0);
    }

    #[tokio::test]
    async fn same_cast_is_enqueued_once() {
        let producer = Producer::new(InMemoryWorkItemStore::new(), JobKind::PaymentBot);
        let snapshot = cast("0xabc");

        let item = producer.enqueue_typed(&snapshot, snapshot.casted_at).await.unwrap();
        assert_eq!(item.dedupe_key.as_deref(), Some("0xabc"));
        assert_eq!(CastSnapshot::from_payload(&item.payload).unwrap(), snapshot);

        let err = producer
            .enqueue_typed(&snapshot, snapshot.casted_at)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn typed_payload_must_match_producer_kind() {
        let producer = Producer::new(InMemoryWorkItemStore::new(), JobKind::StorageCheck);
        let reward = RewardCriteria {
            reward_id: "weekly-top-caster".to_string(),
            criterion: serde_json::json!({"metric": "likes"}),
            recipients: 3,
            amount: "10.00".to_string(),
            cron: "0 0 * * 0".to_string(),
        };

        let err = producer.enqueue_typed(&reward, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(WorkItemError::Validation(_))));
    }
}
