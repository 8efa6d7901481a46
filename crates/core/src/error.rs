//! Domain error model.

use thiserror::Error;

use crate::status::WorkStatus;

/// Result type used across the domain layer.
pub type WorkItemResult<T> = Result<T, WorkItemError>;

/// Work-item domain error.
///
/// Deterministic failures only (validation, illegal transitions, parse
/// failures). Storage and runtime failures belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkItemError {
    /// A status change not allowed by the work-item state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: WorkStatus, to: WorkStatus },

    /// A value failed validation (e.g. malformed payload).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown job kind: {0}")]
    UnknownKind(String),

    #[error("unknown work status: {0}")]
    UnknownStatus(String),
}

impl WorkItemError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
