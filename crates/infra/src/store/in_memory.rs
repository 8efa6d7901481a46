//! In-memory work-item store for tests/dev.
//!
//! Emulates the row-lock semantics of the Postgres store. A claim marks its
//! rows locked and other claims skip them. Recording an outcome applies it and
//! unlocks that row at once, the way the Postgres store commits one row's
//! transaction. Dropping a claim unlocks the remaining rows untouched. Clones
//! share the same table, standing in for several processes connected to one
//! database.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use claimq_core::{JobKind, NewWorkItem, WorkItem, WorkItemId, WorkStatus};

use super::{
    validate_claim_filter, ClaimLedger, ClaimedBatch, StoreError, WorkItemStats, WorkItemStore,
};

#[derive(Debug, Default)]
struct Table {
    items: HashMap<WorkItemId, WorkItem>,
    dedupe_keys: HashSet<(JobKind, String)>,
    locked: HashSet<WorkItemId>,
}

/// In-memory work-item table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkItemStore {
    table: Arc<Mutex<Table>>,
}

impl InMemoryWorkItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of rows currently locked by live claims.
    pub fn locked_count(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .locked
            .len()
    }
}

fn lock(table: &Mutex<Table>) -> Result<MutexGuard<'_, Table>, StoreError> {
    table
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory table lock poisoned".to_string()))
}

#[async_trait::async_trait]
impl WorkItemStore for InMemoryWorkItemStore {
    async fn insert(&self, new: NewWorkItem) -> Result<WorkItem, StoreError> {
        let mut table = lock(&self.table)?;

        if let Some(key) = &new.dedupe_key {
            if table.dedupe_keys.contains(&(new.kind, key.clone())) {
                return Err(StoreError::Duplicate {
                    kind: new.kind,
                    dedupe_key: key.clone(),
                });
            }
        }

        let item = new.into_item(WorkItemId::new(), Utc::now())?;
        if let Some(key) = &item.dedupe_key {
            table.dedupe_keys.insert((item.kind, key.clone()));
        }
        table.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get(&self, id: WorkItemId) -> Result<Option<WorkItem>, StoreError> {
        let table = lock(&self.table)?;
        Ok(table.items.get(&id).cloned())
    }

    async fn claim_batch(
        &self,
        kind: JobKind,
        statuses: &[WorkStatus],
        max_items: usize,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        validate_claim_filter(statuses)?;
        let mut table = lock(&self.table)?;

        let mut candidates: Vec<WorkItem> = table
            .items
            .values()
            .filter(|item| {
                item.kind == kind
                    && statuses.contains(&item.status)
                    && item.due_at <= now
                    && !table.locked.contains(&item.id)
            })
            .cloned()
            .collect();

        candidates.sort_by_key(WorkItem::scheduling_key);
        candidates.truncate(max_items);

        for item in &mut candidates {
            item.mark_claimed()?;
        }
        for item in &candidates {
            table.locked.insert(item.id);
        }

        debug!(kind = %kind, claimed = candidates.len(), "claimed in-memory batch");

        Ok(Box::new(InMemoryClaim {
            kind,
            table: Arc::clone(&self.table),
            ledger: ClaimLedger::new(&candidates),
            items: candidates,
        }))
    }

    async fn list_by_status(
        &self,
        kind: JobKind,
        status: WorkStatus,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let table = lock(&self.table)?;
        let mut result: Vec<_> = table
            .items
            .values()
            .filter(|item| item.kind == kind && item.status == status)
            .cloned()
            .collect();

        result.sort_by_key(WorkItem::scheduling_key);
        result.truncate(limit);
        Ok(result)
    }

    async fn stats(&self, kind: JobKind) -> Result<WorkItemStats, StoreError> {
        let table = lock(&self.table)?;
        let mut stats = WorkItemStats::default();
        for item in table.items.values().filter(|item| item.kind == kind) {
            stats.add(item.status, 1);
        }
        Ok(stats)
    }
}

struct InMemoryClaim {
    kind: JobKind,
    table: Arc<Mutex<Table>>,
    ledger: ClaimLedger,
    items: Vec<WorkItem>,
}

fn apply(table: &mut Table, update: &WorkItem) -> Result<(), StoreError> {
    let stored = table
        .items
        .get_mut(&update.id)
        .ok_or(StoreError::NotFound(update.id))?;
    if stored.version != update.version {
        return Err(StoreError::Conflict(format!(
            "work item {} changed while claimed (version {} != {})",
            update.id, stored.version, update.version
        )));
    }
    *stored = WorkItem {
        version: update.version + 1,
        ..update.clone()
    };
    Ok(())
}

#[async_trait::async_trait]
impl ClaimedBatch for InMemoryClaim {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn items(&self) -> &[WorkItem] {
        &self.items
    }

    async fn record(&mut self, item: &WorkItem) -> Result<(), StoreError> {
        let mut table = lock(&self.table)?;
        self.ledger.admit(item)?;
        // The row is released whether or not the update applies.
        let applied = apply(&mut table, item);
        table.locked.remove(&item.id);
        applied
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Drop for InMemoryClaim {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for id in self.ledger.unrecorded() {
            table.locked.remove(id);
        }
    }
}
