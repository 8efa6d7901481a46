//! `claimq-core`: work-item domain building blocks.
//!
//! This crate contains **pure domain** primitives (no storage or runtime
//! concerns): the `WorkItem` record and its status state machine, the job kinds
//! that share the queue, and the failure accounting policy applied after every
//! processing attempt.

pub mod error;
pub mod failure;
pub mod id;
pub mod item;
pub mod kind;
pub mod kinds;
pub mod outcome;
pub mod status;

pub use error::{WorkItemError, WorkItemResult};
pub use failure::{FailurePolicy, Transition, DEFAULT_FAILURE_THRESHOLD};
pub use id::WorkItemId;
pub use item::{NewWorkItem, WorkItem};
pub use kind::{JobKind, Recurrence};
pub use kinds::{CastSnapshot, JobPayload, RewardCriteria, StorageUsage, StorageWatch};
pub use outcome::{AttemptOutcome, ProcessError, Processed};
pub use status::WorkStatus;
