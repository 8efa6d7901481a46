//! Infrastructure layer: work-item storage, batch claiming, and job runners.
//!
//! The store is the single synchronization point between runner instances:
//! claims are row locks taken with skip-locked semantics, so any number of
//! processes may poll the same table without double-processing an item.

pub mod config;
pub mod coordinator;
pub mod processor;
pub mod producer;
pub mod runner;
pub mod store;

pub use config::{ConfigError, KindConfig, QueueConfig};
pub use coordinator::ClaimCoordinator;
pub use processor::Processor;
pub use producer::Producer;
pub use runner::{JobRunner, JobRunnerHandle, RunnerStatsSnapshot, TickError, TickReport};
pub use store::{
    ClaimedBatch, InMemoryWorkItemStore, PostgresWorkItemStore, StoreError, WorkItemStats,
    WorkItemStore,
};
