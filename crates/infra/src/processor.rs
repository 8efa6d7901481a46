//! Business-logic seam invoked by the runner for each claimed item.

use std::sync::Arc;

use claimq_core::{ProcessError, Processed, WorkItem};

/// Executes one work item.
///
/// Return `Ok` on success (optionally naming the next due time of a recurring
/// item), [`ProcessError::Transient`] for a failure that counts towards the
/// item's threshold, or [`ProcessError::Rejected`] when the item itself is
/// invalid and must never be retried. Panics are treated as transient
/// failures.
#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, item: &WorkItem) -> Result<Processed, ProcessError>;
}

#[async_trait::async_trait]
impl<P: Processor + ?Sized> Processor for Arc<P> {
    async fn process(&self, item: &WorkItem) -> Result<Processed, ProcessError> {
        (**self).process(item).await
    }
}
