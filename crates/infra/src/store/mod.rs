//! Durable work-item storage boundary.
//!
//! A store offers ordinary keyed access plus one concurrency primitive:
//! [`WorkItemStore::claim_batch`], a locked, filtered, ordered, limited select
//! that skips rows locked by other holders. The returned [`ClaimedBatch`] holds
//! one lock per item. Recording an item's outcome commits it and frees that row
//! alone; releasing or dropping the claim frees the rows still held without
//! changing them, as when the holding process dies.

pub mod in_memory;
pub mod postgres;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use claimq_core::{JobKind, NewWorkItem, WorkItem, WorkItemError, WorkItemId, WorkStatus};

pub use in_memory::InMemoryWorkItemStore;
pub use postgres::PostgresWorkItemStore;

/// Work-item store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or failing; aborts the whole poll cycle.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("work item not found: {0}")]
    NotFound(WorkItemId),
    #[error("duplicate {kind} work item for key {dedupe_key}")]
    Duplicate { kind: JobKind, dedupe_key: String },
    /// Version token did not match the stored row.
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("work item {0} is not held by this claim")]
    NotClaimed(WorkItemId),
    #[error("outcome already recorded for work item {0} in this claim")]
    AlreadyRecorded(WorkItemId),
    /// Stored row could not be decoded.
    #[error("corrupt work item row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Domain(#[from] WorkItemError),
}

/// Count of items per status for one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkItemStats {
    pub created: u64,
    pub active: u64,
    pub processed: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl WorkItemStats {
    pub fn add(&mut self, status: WorkStatus, count: u64) {
        match status {
            WorkStatus::Created => self.created += count,
            WorkStatus::Active => self.active += count,
            WorkStatus::Processed => self.processed += count,
            WorkStatus::Rejected => self.rejected += count,
            WorkStatus::Failed => self.failed += count,
            // never persisted
            WorkStatus::Claimed => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.active + self.processed + self.rejected + self.failed
    }
}

/// Work-item store abstraction.
#[async_trait::async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Insert a new item in its kind's initial status.
    async fn insert(&self, new: NewWorkItem) -> Result<WorkItem, StoreError>;

    /// Get an item by id (ignores claims; reads the last committed state).
    async fn get(&self, id: WorkItemId) -> Result<Option<WorkItem>, StoreError>;

    /// Lock and return up to `max_items` due items of `kind` whose status is in
    /// `statuses`, oldest `due_at` first (ties by id). Rows locked by another
    /// claim are skipped, never waited on.
    async fn claim_batch(
        &self,
        kind: JobKind,
        statuses: &[WorkStatus],
        max_items: usize,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, StoreError>;

    /// List items of `kind` in `status`, oldest `due_at` first.
    async fn list_by_status(
        &self,
        kind: JobKind,
        status: WorkStatus,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError>;

    /// Per-status counts for `kind`.
    async fn stats(&self, kind: JobKind) -> Result<WorkItemStats, StoreError>;
}

/// A claim on a batch of rows. Each row is locked independently and its lock
/// lasts for one processing attempt.
///
/// Items are handed out with status `Claimed`. Each may have its outcome
/// recorded exactly once. A successful [`record`](ClaimedBatch::record) is
/// durable immediately and later failures on other items of the batch never
/// undo it. A failed record leaves the stored row untouched and frees it.
#[async_trait::async_trait]
pub trait ClaimedBatch: Send {
    fn kind(&self) -> JobKind;

    fn items(&self) -> &[WorkItem];

    /// Persist the post-attempt state of a claimed item under its lock, commit
    /// it and free the row.
    async fn record(&mut self, item: &WorkItem) -> Result<(), StoreError>;

    /// Free every row whose outcome was not recorded, leaving it unchanged.
    async fn release(self: Box<Self>) -> Result<(), StoreError>;

    fn len(&self) -> usize {
        self.items().len()
    }

    fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

/// Reject status filters that would let a claim select non-claimable rows.
pub(crate) fn validate_claim_filter(statuses: &[WorkStatus]) -> Result<(), StoreError> {
    if statuses.is_empty() {
        return Err(StoreError::Domain(WorkItemError::validation(
            "claim status filter must not be empty",
        )));
    }
    if let Some(status) = statuses.iter().find(|s| !s.is_claimable()) {
        return Err(StoreError::Domain(WorkItemError::validation(format!(
            "status {status} is not claimable"
        ))));
    }
    Ok(())
}

/// Bookkeeping shared by claim implementations: which items this claim holds,
/// at which version, and which already have an outcome.
#[derive(Debug, Default)]
pub(crate) struct ClaimLedger {
    held: BTreeMap<WorkItemId, u64>,
    recorded: HashSet<WorkItemId>,
}

impl ClaimLedger {
    pub(crate) fn new(items: &[WorkItem]) -> Self {
        Self {
            held: items.iter().map(|item| (item.id, item.version)).collect(),
            recorded: HashSet::new(),
        }
    }

    /// Check `item` may be recorded and mark it recorded. Returns the version
    /// the row had when claimed.
    pub(crate) fn admit(&mut self, item: &WorkItem) -> Result<u64, StoreError> {
        let claimed_version = *self
            .held
            .get(&item.id)
            .ok_or(StoreError::NotClaimed(item.id))?;

        if self.recorded.contains(&item.id) {
            return Err(StoreError::AlreadyRecorded(item.id));
        }
        if item.version != claimed_version {
            return Err(StoreError::Conflict(format!(
                "work item {} claimed at version {claimed_version}, record carries {}",
                item.id, item.version
            )));
        }
        if item.status == WorkStatus::Claimed {
            return Err(StoreError::Domain(WorkItemError::validation(format!(
                "work item {} has no outcome applied",
                item.id
            ))));
        }

        self.recorded.insert(item.id);
        Ok(claimed_version)
    }

    /// Items still held: claimed and not yet recorded.
    pub(crate) fn unrecorded(&self) -> impl Iterator<Item = &WorkItemId> {
        self.held.keys().filter(|id| !self.recorded.contains(*id))
    }
}

/// Claim that holds nothing.
#[derive(Debug)]
pub struct EmptyBatch {
    kind: JobKind,
}

impl EmptyBatch {
    pub fn new(kind: JobKind) -> Self {
        Self { kind }
    }
}

#[async_trait::async_trait]
impl ClaimedBatch for EmptyBatch {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn items(&self) -> &[WorkItem] {
        &[]
    }

    async fn record(&mut self, item: &WorkItem) -> Result<(), StoreError> {
        Err(StoreError::NotClaimed(item.id))
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: WorkItemStore + ?Sized> WorkItemStore for Arc<S> {
    async fn insert(&self, new: NewWorkItem) -> Result<WorkItem, StoreError> {
        (**self).insert(new).await
    }

    async fn get(&self, id: WorkItemId) -> Result<Option<WorkItem>, StoreError> {
        (**self).get(id).await
    }

    async fn claim_batch(
        &self,
        kind: JobKind,
        statuses: &[WorkStatus],
        max_items: usize,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        (**self).claim_batch(kind, statuses, max_items, now).await
    }

    async fn list_by_status(
        &self,
        kind: JobKind,
        status: WorkStatus,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        (**self).list_by_status(kind, status, limit).await
    }

    async fn stats(&self, kind: JobKind) -> Result<WorkItemStats, StoreError> {
        (**self).stats(kind).await
    }
}
