//! Periodic claim/process/record loop, one task per registered kind.
//!
//! Each tick claims a batch through the [`ClaimCoordinator`], then for every
//! claimed item runs the kind's [`Processor`] under the kind's attempt timeout,
//! applies the [`FailurePolicy`] and records the result. Recording commits that
//! item and frees its row before the next attempt starts. A store outage
//! abandons the rest of the tick: outcomes already recorded stay, and the rows
//! not yet attempted are released untouched for a later tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use claimq_core::{AttemptOutcome, FailurePolicy, JobKind, Transition, WorkItem};

use crate::config::QueueConfig;
use crate::coordinator::ClaimCoordinator;
use crate::processor::Processor;
use crate::store::{StoreError, WorkItemStore};

/// Why a tick produced no report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TickError {
    /// Claiming or recording hit an unavailable store. Outcomes recorded
    /// earlier in the tick are kept.
    #[error("tick abandoned: {0}")]
    Store(#[from] StoreError),
    #[error("no processor registered for {0}")]
    NotRegistered(JobKind),
}

/// What one tick did for one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub kind: JobKind,
    pub claimed: usize,
    pub succeeded: usize,
    /// Failures below the threshold (item stays claimable).
    pub failed: usize,
    pub rejected: usize,
    /// Failures that reached the threshold.
    pub disabled: usize,
    /// Items whose outcome could not be recorded; they keep their prior state.
    pub unrecorded: usize,
}

impl TickReport {
    /// Items whose outcome was committed.
    pub fn recorded(&self) -> usize {
        self.succeeded + self.failed + self.rejected + self.disabled
    }

    fn new(kind: JobKind) -> Self {
        Self {
            kind,
            claimed: 0,
            succeeded: 0,
            failed: 0,
            rejected: 0,
            disabled: 0,
            unrecorded: 0,
        }
    }
}

#[derive(Debug, Default)]
struct RunnerStats {
    ticks: AtomicU64,
    ticks_abandoned: AtomicU64,
    claimed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    disabled: AtomicU64,
}

impl RunnerStats {
    fn absorb(&self, report: &TickReport) {
        self.claimed.fetch_add(report.claimed as u64, Ordering::Relaxed);
        self.succeeded.fetch_add(report.succeeded as u64, Ordering::Relaxed);
        self.failed
            .fetch_add((report.failed + report.disabled) as u64, Ordering::Relaxed);
        self.rejected.fetch_add(report.rejected as u64, Ordering::Relaxed);
        self.disabled.fetch_add(report.disabled as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RunnerStatsSnapshot {
        RunnerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_abandoned: self.ticks_abandoned.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            disabled: self.disabled.load(Ordering::Relaxed),
        }
    }
}

/// Runner counters since start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStatsSnapshot {
    pub ticks: u64,
    pub ticks_abandoned: u64,
    pub claimed: u64,
    pub succeeded: u64,
    /// All failed attempts, including the ones that disabled their item.
    pub failed: u64,
    pub rejected: u64,
    pub disabled: u64,
}

/// Job runner.
///
/// Any number of runners may share one store; the claim protocol keeps them
/// from processing the same item concurrently.
pub struct JobRunner<S> {
    name: String,
    coordinator: ClaimCoordinator<S>,
    config: QueueConfig,
    processors: HashMap<JobKind, Arc<dyn Processor>>,
    stats: Arc<RunnerStats>,
}

impl<S: WorkItemStore + 'static> JobRunner<S> {
    pub fn new(store: S, config: QueueConfig) -> Self {
        Self {
            name: "job-runner".to_string(),
            coordinator: ClaimCoordinator::new(store),
            config,
            processors: HashMap::new(),
            stats: Arc::new(RunnerStats::default()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register the processor for `kind`, replacing any previous one.
    pub fn register<P>(&mut self, kind: JobKind, processor: P) -> &mut Self
    where
        P: Processor + 'static,
    {
        self.processors.insert(kind, Arc::new(processor));
        self
    }

    pub fn stats(&self) -> RunnerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one claim/process/record cycle for `kind`.
    pub async fn run_tick(&self, kind: JobKind) -> Result<TickReport, TickError> {
        let processor = self
            .processors
            .get(&kind)
            .cloned()
            .ok_or(TickError::NotRegistered(kind))?;

        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let mut report = TickReport::new(kind);
        let result = self.tick(kind, processor, &mut report).await;
        self.stats.absorb(&report);

        match result {
            Ok(()) => Ok(report),
            Err(e) => {
                self.stats.ticks_abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(
                    runner = %self.name,
                    kind = %kind,
                    recorded = report.recorded(),
                    error = %e,
                    "tick abandoned"
                );
                Err(e)
            }
        }
    }

    async fn tick(
        &self,
        kind: JobKind,
        processor: Arc<dyn Processor>,
        report: &mut TickReport,
    ) -> Result<(), TickError> {
        let kind_config = self.config.kind(kind);
        let policy = kind_config.failure_policy();

        let mut batch = self
            .coordinator
            .claim_batch(kind, kind.claim_filter(), kind_config.batch_size)
            .await?;

        report.claimed = batch.len();
        let items = batch.items().to_vec();
        for item in items {
            let outcome =
                attempt(processor.clone(), item.clone(), kind_config.attempt_timeout).await;
            let now = Utc::now();
            let outcome =
                with_default_recurrence(&item, outcome, now, kind_config.recurrence_interval);

            let mut updated = item;
            let transition = match policy.record_outcome(&mut updated, &outcome, now) {
                Ok(transition) => transition,
                Err(e) => {
                    error!(
                        runner = %self.name,
                        id = %updated.id,
                        error = %e,
                        "could not apply outcome"
                    );
                    report.unrecorded += 1;
                    continue;
                }
            };

            // A failed record leaves the row as it was and frees it; the
            // outcomes recorded before it are already committed.
            match batch.record(&updated).await {
                Ok(()) => count_transition(report, &updated, &transition, &policy),
                Err(e @ StoreError::Unavailable(_)) => {
                    error!(
                        runner = %self.name,
                        id = %updated.id,
                        error = %e,
                        "could not record outcome"
                    );
                    report.unrecorded += 1;
                    return Err(TickError::Store(e));
                }
                Err(e) => {
                    error!(
                        runner = %self.name,
                        id = %updated.id,
                        error = %e,
                        "could not record outcome"
                    );
                    report.unrecorded += 1;
                }
            }
        }

        batch.release().await?;

        debug!(
            runner = %self.name,
            kind = %kind,
            claimed = report.claimed,
            succeeded = report.succeeded,
            failed = report.failed,
            rejected = report.rejected,
            disabled = report.disabled,
            unrecorded = report.unrecorded,
            "tick finished"
        );
        Ok(())
    }

    /// Start one polling task per registered kind.
    pub fn spawn(self) -> JobRunnerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();

        let mut kinds: Vec<JobKind> = self.processors.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());

        let runner = Arc::new(self);
        let joins = kinds
            .into_iter()
            .map(|kind| {
                let runner = runner.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { runner.kind_loop(kind, shutdown).await })
            })
            .collect();

        JobRunnerHandle {
            shutdown: shutdown_tx,
            joins,
            stats,
        }
    }

    async fn kind_loop(&self, kind: JobKind, mut shutdown: watch::Receiver<bool>) {
        let poll_interval = self.config.kind(kind).poll_interval;
        info!(runner = %self.name, kind = %kind, ?poll_interval, "kind loop started");

        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    // Errors are counted and logged by run_tick; the next tick retries.
                    let _ = self.run_tick(kind).await;
                }
            }
        }

        info!(runner = %self.name, kind = %kind, "kind loop stopped");
    }
}

/// Handle to control a running [`JobRunner`].
#[derive(Debug)]
pub struct JobRunnerHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<RunnerStats>,
}

impl JobRunnerHandle {
    pub fn stats(&self) -> RunnerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop every kind loop after its current tick and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "kind loop ended abnormally");
            }
        }
    }
}

/// Run one processor attempt in its own task so a panic or a hang stays
/// contained to this item.
async fn attempt(
    processor: Arc<dyn Processor>,
    item: WorkItem,
    timeout: Duration,
) -> AttemptOutcome {
    let id = item.id;
    let task = tokio::spawn(async move { processor.process(&item).await });
    let abort = task.abort_handle();

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => AttemptOutcome::from(result),
        Ok(Err(join_err)) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            warn!(id = %id, panic = %message, "processor panicked");
            AttemptOutcome::Failed(format!("processor panicked: {message}"))
        }
        Ok(Err(join_err)) => AttemptOutcome::Failed(format!("processor task failed: {join_err}")),
        Err(_) => {
            abort.abort();
            AttemptOutcome::Failed(format!("processor timed out after {timeout:?}"))
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Recurring successes without a processor-chosen next due time are re-armed
/// one recurrence interval from now.
fn with_default_recurrence(
    item: &WorkItem,
    outcome: AttemptOutcome,
    now: DateTime<Utc>,
    recurrence_interval: Duration,
) -> AttemptOutcome {
    match outcome {
        AttemptOutcome::Succeeded { next_due_at: None } if item.kind.is_recurring() => {
            let next_due_at = chrono::Duration::from_std(recurrence_interval)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            AttemptOutcome::Succeeded {
                next_due_at: Some(next_due_at),
            }
        }
        other => other,
    }
}

fn count_transition(
    report: &mut TickReport,
    item: &WorkItem,
    transition: &Transition,
    policy: &FailurePolicy,
) {
    match transition {
        Transition::Completed | Transition::Rescheduled { .. } => {
            report.succeeded += 1;
            debug!(id = %item.id, status = %item.status, due_at = %item.due_at, "item succeeded");
        }
        Transition::RetryScheduled { failure_count } => {
            report.failed += 1;
            debug!(
                id = %item.id,
                failure_count,
                threshold = policy.threshold,
                error = item.last_error.as_deref().unwrap_or_default(),
                "item failed, will retry"
            );
        }
        Transition::Disabled { failure_count } => {
            report.disabled += 1;
            warn!(
                id = %item.id,
                kind = %item.kind,
                failure_count,
                error = item.last_error.as_deref().unwrap_or_default(),
                "item disabled after repeated failures"
            );
        }
        Transition::Rejected => {
            report.rejected += 1;
            warn!(
                id = %item.id,
                kind = %item.kind,
                reason = item.last_error.as_deref().unwrap_or_default(),
                "item rejected"
            );
        }
    }
}
