//! Typed payload shapes for the three job kinds.
//!
//! The queue stores payloads as opaque JSON. These types are the shapes the
//! producers and processors agree on; nothing in the claim/runner path reads
//! them.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::WorkItemError;
use crate::item::NewWorkItem;
use crate::kind::JobKind;

/// A payload bound to one job kind.
pub trait JobPayload: Serialize + DeserializeOwned {
    const KIND: JobKind;

    /// Source-event key preventing duplicate enqueue within the kind.
    fn dedupe_key(&self) -> String;

    fn to_payload(&self) -> Result<serde_json::Value, WorkItemError> {
        serde_json::to_value(self)
            .map_err(|e| WorkItemError::validation(format!("{} payload: {e}", Self::KIND)))
    }

    fn from_payload(value: &serde_json::Value) -> Result<Self, WorkItemError> {
        Self::deserialize(value)
            .map_err(|e| WorkItemError::validation(format!("{} payload: {e}", Self::KIND)))
    }

    fn to_new_item(&self, due_at: DateTime<Utc>) -> Result<NewWorkItem, WorkItemError> {
        Ok(NewWorkItem::new(Self::KIND, self.to_payload()?, due_at)
            .with_dedupe_key(self.dedupe_key()))
    }
}

/// Snapshot of a cast mentioning the payment bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastSnapshot {
    pub hash: String,
    pub author_fid: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
    pub casted_at: DateTime<Utc>,
}

impl CastSnapshot {
    /// Payment-bot items are ordered by when the cast was published.
    pub fn to_scheduled_item(&self) -> Result<NewWorkItem, WorkItemError> {
        self.to_new_item(self.casted_at)
    }
}

impl JobPayload for CastSnapshot {
    const KIND: JobKind = JobKind::PaymentBot;

    fn dedupe_key(&self) -> String {
        self.hash.clone()
    }
}

/// A user's registered storage watch and the last usage seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageWatch {
    pub fid: u64,
    /// Percent of allocated storage at which the user is notified.
    pub threshold_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_usage: Option<StorageUsage>,
}

/// Per-unit storage usage snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub casts_used: u64,
    pub casts_capacity: u64,
    pub links_used: u64,
    pub links_capacity: u64,
    pub observed_at: DateTime<Utc>,
}

impl JobPayload for StorageWatch {
    const KIND: JobKind = JobKind::StorageCheck;

    fn dedupe_key(&self) -> String {
        self.fid.to_string()
    }
}

/// Criteria for a scheduled reward disbursement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardCriteria {
    pub reward_id: String,
    /// Free-form criterion evaluated by the reward processor.
    pub criterion: serde_json::Value,
    pub recipients: u32,
    /// Per-recipient amount in the token's smallest unit, as a decimal string.
    pub amount: String,
    /// Cron expression the processor uses to compute the next due time.
    pub cron: String,
}

impl JobPayload for RewardCriteria {
    const KIND: JobKind = JobKind::RewardSchedule;

    fn dedupe_key(&self) -> String {
        self.reward_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_snapshot_is_scheduled_at_cast_time() {
        let casted_at = Utc::now();
        let cast = CastSnapshot {
            hash: "0xabc".to_string(),
            author_fid: 42,
            text: "@payflow send 5 usdc to @alice".to_string(),
            parent_hash: None,
            casted_at,
        };

        let new = cast.to_scheduled_item().unwrap();
        assert_eq!(new.kind, JobKind::PaymentBot);
        assert_eq!(new.due_at, casted_at);
        assert_eq!(new.dedupe_key.as_deref(), Some("0xabc"));
        assert_eq!(CastSnapshot::from_payload(&new.payload).unwrap(), cast);
    }

    #[test]
    fn storage_watch_dedupes_per_fid() {
        let watch = StorageWatch {
            fid: 1234,
            threshold_percent: 90,
            last_usage: None,
        };
        let new = watch.to_new_item(Utc::now()).unwrap();
        assert_eq!(new.kind, JobKind::StorageCheck);
        assert_eq!(new.dedupe_key.as_deref(), Some("1234"));
    }

    #[test]
    fn mismatched_payload_is_a_validation_error() {
        let err = RewardCriteria::from_payload(&serde_json::json!({"fid": 1})).unwrap_err();
        assert!(matches!(
            err,
            WorkItemError::Validation(msg) if msg.starts_with("reward_schedule payload")
        ));
    }
}
