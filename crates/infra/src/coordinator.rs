//! Batch claiming over a [`WorkItemStore`].

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use claimq_core::{JobKind, WorkStatus};

use crate::store::{validate_claim_filter, ClaimedBatch, EmptyBatch, StoreError, WorkItemStore};

/// Claims due work items without ever waiting on rows held elsewhere.
///
/// Any number of coordinators, in any number of processes, may share a store:
/// an item appears in at most one live claim at a time.
#[derive(Debug, Clone)]
pub struct ClaimCoordinator<S> {
    store: S,
}

impl<S: WorkItemStore> ClaimCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claim up to `max_items` due items of `kind` whose status is in
    /// `status_filter`, oldest first.
    ///
    /// An empty batch is the normal result when nothing is due or everything
    /// due is claimed elsewhere.
    pub async fn claim_batch(
        &self,
        kind: JobKind,
        status_filter: &[WorkStatus],
        max_items: usize,
    ) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        self.claim_batch_at(kind, status_filter, max_items, Utc::now()).await
    }

    /// [`claim_batch`](Self::claim_batch) with an explicit notion of "now".
    #[instrument(skip(self, status_filter), fields(kind = %kind), err)]
    pub async fn claim_batch_at(
        &self,
        kind: JobKind,
        status_filter: &[WorkStatus],
        max_items: usize,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        validate_claim_filter(status_filter)?;
        if max_items == 0 {
            return Ok(Box::new(EmptyBatch::new(kind)));
        }

        let batch = self
            .store
            .claim_batch(kind, status_filter, max_items, now)
            .await?;

        if batch.is_empty() {
            debug!(kind = %kind, "nothing due");
        } else {
            debug!(kind = %kind, claimed = batch.len(), max_items, "claimed batch");
        }
        Ok(batch)
    }
}
