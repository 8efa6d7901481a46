//! Postgres-backed work-item store.
//!
//! A claim holds one transaction per row, each locking its row with
//! `FOR UPDATE SKIP LOCKED`. Recording an outcome writes it inside that row's
//! transaction with a version check and commits, so one item's failure can
//! never roll back another's outcome. If the holder crashes or drops the
//! claim, the remaining transactions roll back and those rows are claimable
//! again.
//!
//! A batch of `n` items holds up to `n` pooled connections. Claiming stops
//! early, returning a smaller batch, once the pool has no spare connection.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` (on insert) / `Conflict` |
//! | Database (check constraint violation) | `23514` | `Corrupt` |
//! | Database (data exception) | `22xxx` | `Corrupt` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / Io / Tls / PoolTimedOut | N/A | `Unavailable` |
//! | ColumnDecode / Decode | N/A | `Corrupt` |

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument, Span};

use claimq_core::{JobKind, NewWorkItem, WorkItem, WorkItemId, WorkStatus};

use super::{
    validate_claim_filter, ClaimLedger, ClaimedBatch, StoreError, WorkItemStats, WorkItemStore,
};

const SCHEMA: &str = include_str!("../../schema/work_items.sql");

const COLUMNS: &str = "id, kind, status, dedupe_key, payload, created_at, due_at, \
     failure_count, last_attempt_at, last_success_at, last_error, version";

/// Postgres-backed work-item store.
///
/// Cloning is cheap and shares the pool.
#[derive(Debug, Clone)]
pub struct PostgresWorkItemStore {
    pool: Arc<PgPool>,
}

impl PostgresWorkItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `work_items` table and its claim index if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkItemStore for PostgresWorkItemStore {
    #[instrument(skip(self, new), fields(kind = %new.kind), err)]
    async fn insert(&self, new: NewWorkItem) -> Result<WorkItem, StoreError> {
        let item = new.into_item(WorkItemId::new(), Utc::now())?;

        let query = format!(
            "INSERT INTO work_items ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(item.id.as_uuid())
            .bind(item.kind.as_str())
            .bind(item.status.as_str())
            .bind(item.dedupe_key.as_deref())
            .bind(&item.payload)
            .bind(item.created_at)
            .bind(item.due_at)
            .bind(item.failure_count as i32)
            .bind(item.last_attempt_at)
            .bind(item.last_success_at)
            .bind(item.last_error.as_deref())
            .bind(item.version as i64)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| match &item.dedupe_key {
                Some(key) if is_unique_violation(&e) => StoreError::Duplicate {
                    kind: item.kind,
                    dedupe_key: key.clone(),
                },
                _ => map_sqlx_error("insert", e),
            })?;

        decode_row(&row)
    }

    #[instrument(skip(self), fields(id = %id), err)]
    async fn get(&self, id: WorkItemId) -> Result<Option<WorkItem>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM work_items WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(
        skip(self, statuses),
        fields(kind = %kind, claimed = tracing::field::Empty),
        err
    )]
    async fn claim_batch(
        &self,
        kind: JobKind,
        statuses: &[WorkStatus],
        max_items: usize,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        validate_claim_filter(statuses)?;

        let status_names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let query = format!(
            "SELECT {COLUMNS} FROM work_items \
             WHERE kind = $1 AND status = ANY($2) AND due_at <= $3 \
             ORDER BY due_at ASC, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );

        let mut items = Vec::new();
        let mut claims = HashMap::new();
        while items.len() < max_items {
            if !items.is_empty() && !has_spare_connection(&self.pool) {
                debug!(
                    kind = %kind,
                    claimed = items.len(),
                    "pool exhausted, claiming a smaller batch"
                );
                break;
            }

            let mut tx = match self.pool.begin().await {
                Ok(tx) => tx,
                Err(e) if items.is_empty() => return Err(map_sqlx_error("begin_claim", e)),
                Err(e) => {
                    debug!(kind = %kind, error = %e, "no connection for another row");
                    break;
                }
            };

            // Rows locked by this claim's earlier transactions are skipped too.
            let row = sqlx::query(&query)
                .bind(kind.as_str())
                .bind(&status_names)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("claim_batch", e))?;
            let Some(row) = row else {
                break;
            };

            let mut item = decode_row(&row)?;
            item.mark_claimed()?;
            claims.insert(item.id, tx);
            items.push(item);
        }

        Span::current().record("claimed", items.len());
        debug!(kind = %kind, claimed = items.len(), "claimed postgres batch");

        Ok(Box::new(PostgresClaimedBatch {
            kind,
            claims,
            ledger: ClaimLedger::new(&items),
            items,
        }))
    }

    #[instrument(skip(self), fields(kind = %kind, status = %status), err)]
    async fn list_by_status(
        &self,
        kind: JobKind,
        status: WorkStatus,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM work_items \
             WHERE kind = $1 AND status = $2 \
             ORDER BY due_at ASC, id ASC \
             LIMIT $3"
        );
        let rows = sqlx::query(&query)
            .bind(kind.as_str())
            .bind(status.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_by_status", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), fields(kind = %kind), err)]
    async fn stats(&self, kind: JobKind) -> Result<WorkItemStats, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM work_items
            WHERE kind = $1
            GROUP BY status
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = WorkItemStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| StoreError::Corrupt(format!("failed to read status: {e}")))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;
            let status = WorkStatus::from_str(&status)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            stats.add(status, count.max(0) as u64);
        }
        Ok(stats)
    }
}

/// Claim backed by one open transaction per row. Dropping it rolls back the
/// transactions not yet committed by `record`.
struct PostgresClaimedBatch {
    kind: JobKind,
    claims: HashMap<WorkItemId, Transaction<'static, Postgres>>,
    ledger: ClaimLedger,
    items: Vec<WorkItem>,
}

#[async_trait::async_trait]
impl ClaimedBatch for PostgresClaimedBatch {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn items(&self) -> &[WorkItem] {
        &self.items
    }

    #[instrument(skip(self, item), fields(id = %item.id, status = %item.status), err)]
    async fn record(&mut self, item: &WorkItem) -> Result<(), StoreError> {
        let claimed_version = self.ledger.admit(item)?;
        // Taken out before any statement runs: on error the transaction is
        // dropped, which rolls back this row only.
        let mut tx = self
            .claims
            .remove(&item.id)
            .ok_or(StoreError::NotClaimed(item.id))?;

        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = $2,
                due_at = $3,
                failure_count = $4,
                last_attempt_at = $5,
                last_success_at = $6,
                last_error = $7,
                payload = $8,
                version = version + 1
            WHERE id = $1 AND version = $9
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.status.as_str())
        .bind(item.due_at)
        .bind(item.failure_count as i32)
        .bind(item.last_attempt_at)
        .bind(item.last_success_at)
        .bind(item.last_error.as_deref())
        .bind(&item.payload)
        .bind(claimed_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("record", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "work item {} no longer at version {claimed_version}",
                item.id
            )));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("record_commit", e))
    }

    async fn release(mut self: Box<Self>) -> Result<(), StoreError> {
        let mut first_error = None;
        for (_, tx) in self.claims.drain() {
            if let Err(e) = tx.rollback().await {
                first_error.get_or_insert(map_sqlx_error("release", e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Whether the pool can hand out another connection without waiting.
fn has_spare_connection(pool: &PgPool) -> bool {
    pool.num_idle() > 0 || pool.size() < pool.options().get_max_connections()
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<WorkItem, StoreError> {
    WorkItemRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to decode work item row: {e}")))?
        .try_into()
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23514") => StoreError::Corrupt(msg),
                Some(code) if code.starts_with("22") => StoreError::Corrupt(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct WorkItemRow {
    id: uuid::Uuid,
    kind: String,
    status: String,
    dedupe_key: Option<String>,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    failure_count: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for WorkItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(WorkItemRow {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            dedupe_key: row.try_get("dedupe_key")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            due_at: row.try_get("due_at")?,
            failure_count: row.try_get("failure_count")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            last_success_at: row.try_get("last_success_at")?,
            last_error: row.try_get("last_error")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<WorkItemRow> for WorkItem {
    type Error = StoreError;

    fn try_from(row: WorkItemRow) -> Result<Self, Self::Error> {
        let corrupt = |e: claimq_core::WorkItemError| StoreError::Corrupt(e.to_string());
        Ok(WorkItem {
            id: WorkItemId::from_uuid(row.id),
            kind: JobKind::from_str(&row.kind).map_err(corrupt)?,
            status: WorkStatus::from_str(&row.status).map_err(corrupt)?,
            dedupe_key: row.dedupe_key,
            payload: row.payload,
            created_at: row.created_at,
            due_at: row.due_at,
            failure_count: u32::try_from(row.failure_count).map_err(|_| {
                StoreError::Corrupt(format!("negative failure_count for {}", row.id))
            })?,
            last_attempt_at: row.last_attempt_at,
            last_success_at: row.last_success_at,
            last_error: row.last_error,
            version: u64::try_from(row.version)
                .map_err(|_| StoreError::Corrupt(format!("negative version for {}", row.id)))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_declares_claim_index_and_dedupe_constraint() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS work_items"));
        assert!(SCHEMA.contains("(kind, status, due_at, id)"));
        assert!(SCHEMA.contains("UNIQUE (kind, dedupe_key)"));
    }

    #[test]
    fn rows_with_unknown_kind_are_corrupt() {
        let row = WorkItemRow {
            id: uuid::Uuid::now_v7(),
            kind: "mystery".to_string(),
            status: "active".to_string(),
            dedupe_key: None,
            payload: serde_json::json!({}),
            created_at: Utc::now(),
            due_at: Utc::now(),
            failure_count: 0,
            last_attempt_at: None,
            last_success_at: None,
            last_error: None,
            version: 0,
        };

        let err = WorkItem::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn rows_decode_into_work_items() {
        let id = uuid::Uuid::now_v7();
        let row = WorkItemRow {
            id,
            kind: "storage_check".to_string(),
            status: "active".to_string(),
            dedupe_key: Some("fid:3".to_string()),
            payload: serde_json::json!({"fid": 3}),
            created_at: Utc::now(),
            due_at: Utc::now(),
            failure_count: 2,
            last_attempt_at: None,
            last_success_at: None,
            last_error: Some("hub timeout".to_string()),
            version: 7,
        };

        let item = WorkItem::try_from(row).unwrap();
        assert_eq!(item.id, WorkItemId::from_uuid(id));
        assert_eq!(item.kind, JobKind::StorageCheck);
        assert_eq!(item.status, WorkStatus::Active);
        assert_eq!(item.failure_count, 2);
        assert_eq!(item.version, 7);
    }
}
