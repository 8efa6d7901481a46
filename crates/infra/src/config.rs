//! Per-kind runner configuration.
//!
//! Every kind has its own cadence and tunables. Values come from defaults,
//! optionally overridden by `CLAIMQ_<KIND>_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use claimq_core::{JobKind, DEFAULT_FAILURE_THRESHOLD, FailurePolicy};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECURRENCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?} as {expected}")]
    Parse {
        var: String,
        value: String,
        expected: &'static str,
    },
    #[error("{kind}: {field} must be {requirement}")]
    OutOfRange {
        kind: JobKind,
        field: &'static str,
        requirement: &'static str,
    },
}

/// Tunables for one job kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindConfig {
    /// Time between claim attempts
    pub poll_interval: Duration,
    /// Max items per claim
    pub batch_size: usize,
    /// Consecutive failures before an item is disabled
    pub failure_threshold: u32,
    /// Bound on a single processor attempt
    pub attempt_timeout: Duration,
    /// Next due time after a recurring success when the processor gives none
    pub recurrence_interval: Duration,
}

impl KindConfig {
    /// Defaults for `kind`: payment bots poll every 5s, recurring kinds every minute.
    pub fn for_kind(kind: JobKind) -> Self {
        let poll_interval = match kind {
            JobKind::PaymentBot => Duration::from_secs(5),
            JobKind::StorageCheck | JobKind::RewardSchedule => Duration::from_secs(60),
        };
        Self {
            poll_interval,
            batch_size: DEFAULT_BATCH_SIZE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            recurrence_interval: DEFAULT_RECURRENCE_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_recurrence_interval(mut self, interval: Duration) -> Self {
        self.recurrence_interval = interval;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            threshold: self.failure_threshold.max(1),
        }
    }

    pub fn validate(&self, kind: JobKind) -> Result<(), ConfigError> {
        let out_of_range = |field, requirement| ConfigError::OutOfRange {
            kind,
            field,
            requirement,
        };
        if self.batch_size == 0 {
            return Err(out_of_range("batch_size", "at least 1"));
        }
        if self.failure_threshold == 0 {
            return Err(out_of_range("failure_threshold", "at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(out_of_range("poll_interval", "greater than zero"));
        }
        if self.attempt_timeout.is_zero() {
            return Err(out_of_range("attempt_timeout", "greater than zero"));
        }
        if self.recurrence_interval.is_zero() {
            return Err(out_of_range("recurrence_interval", "greater than zero"));
        }
        Ok(())
    }
}

/// Configuration for all kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    kinds: HashMap<JobKind, KindConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kinds: JobKind::ALL
                .iter()
                .map(|kind| (*kind, KindConfig::for_kind(*kind)))
                .collect(),
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        for kind in JobKind::ALL {
            let prefix = format!("CLAIMQ_{}", kind.env_key());
            let entry = config.kind_mut(kind);

            if let Some(ms) = read_u64(&lookup, &format!("{prefix}_POLL_INTERVAL_MS"))? {
                entry.poll_interval = Duration::from_millis(ms);
            }
            if let Some(n) = read_u64(&lookup, &format!("{prefix}_BATCH_SIZE"))? {
                entry.batch_size = usize::try_from(n).unwrap_or(usize::MAX);
            }
            if let Some(n) = read_u64(&lookup, &format!("{prefix}_FAILURE_THRESHOLD"))? {
                entry.failure_threshold = u32::try_from(n).unwrap_or(u32::MAX);
            }
            if let Some(ms) = read_u64(&lookup, &format!("{prefix}_ATTEMPT_TIMEOUT_MS"))? {
                entry.attempt_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = read_u64(&lookup, &format!("{prefix}_RECURRENCE_INTERVAL_MS"))? {
                entry.recurrence_interval = Duration::from_millis(ms);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn kind(&self, kind: JobKind) -> KindConfig {
        self.kinds
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| KindConfig::for_kind(kind))
    }

    fn kind_mut(&mut self, kind: JobKind) -> &mut KindConfig {
        self.kinds
            .entry(kind)
            .or_insert_with(|| KindConfig::for_kind(kind))
    }

    pub fn with_kind(mut self, kind: JobKind, config: KindConfig) -> Self {
        self.kinds.insert(kind, config);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, config) in &self.kinds {
            config.validate(*kind)?;
        }
        Ok(())
    }
}

fn read_u64<F>(lookup: &F, var: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Parse {
                var: var.to_string(),
                value: raw,
                expected: "a non-negative integer",
            }),
    }
}
