//! Processor results as seen by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Successful processing of one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Processed {
    /// Next due time for recurring kinds (computed by the processor).
    /// Ignored for one-shot kinds.
    pub next_due_at: Option<DateTime<Utc>>,
}

impl Processed {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn next_due(at: DateTime<Utc>) -> Self {
        Self {
            next_due_at: Some(at),
        }
    }
}

/// Processor failure, classified by whether retrying can help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// External call failed, timed out, or data was temporarily unavailable.
    #[error("{0}")]
    Transient(String),
    /// The item itself is invalid (malformed input, disallowed actor).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ProcessError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }
}

/// Outcome of one attempt, as recorded by the failure policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded { next_due_at: Option<DateTime<Utc>> },
    Failed(String),
    Rejected(String),
}

impl From<Result<Processed, ProcessError>> for AttemptOutcome {
    fn from(result: Result<Processed, ProcessError>) -> Self {
        match result {
            Ok(processed) => AttemptOutcome::Succeeded {
                next_due_at: processed.next_due_at,
            },
            Err(ProcessError::Transient(detail)) => AttemptOutcome::Failed(detail),
            Err(ProcessError::Rejected(reason)) => AttemptOutcome::Rejected(reason),
        }
    }
}

/// Processors written against `anyhow` can `?` straight into a transient failure.
impl From<anyhow::Error> for ProcessError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_results_map_to_attempt_outcomes() {
        let at = Utc::now();
        assert_eq!(
            AttemptOutcome::from(Ok(Processed::next_due(at))),
            AttemptOutcome::Succeeded {
                next_due_at: Some(at)
            }
        );
        assert_eq!(
            AttemptOutcome::from(Err(ProcessError::transient("hub timeout"))),
            AttemptOutcome::Failed("hub timeout".to_string())
        );
        assert_eq!(
            AttemptOutcome::from(Err(ProcessError::rejected("sender not allowed"))),
            AttemptOutcome::Rejected("sender not allowed".to_string())
        );
    }

    #[test]
    fn anyhow_errors_are_transient_with_context_chain() {
        let err = anyhow::anyhow!("connection reset").context("fetching storage usage");
        let mapped = ProcessError::from(err);
        assert_eq!(
            mapped,
            ProcessError::Transient("fetching storage usage: connection reset".to_string())
        );
    }
}
