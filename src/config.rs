//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Maximum number of users per batched message fetch.
pub const DEFAULT_BATCH_SIZE: usize = 2;

/// Maximum number of spam checks the classifier keeps in flight.
pub const DEFAULT_CLASSIFIER_WORKERS: usize = 5;

/// Pipeline configuration.
///
/// Both values are ceilings imposed by the collaborators, not tuning knobs:
/// the message store rejects larger batches and the spam checker rate-limits
/// above `classifier_workers` concurrent calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Users per `MessageStore::get_messages` call.
    pub batch_size: usize,
    /// Size of the spam classifier's worker pool.
    pub classifier_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            classifier_workers: DEFAULT_CLASSIFIER_WORKERS,
        }
    }
}

impl PipelineConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// - `SPAM_PIPELINE_BATCH_SIZE`
    /// - `SPAM_PIPELINE_CLASSIFIER_WORKERS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let batch_size = env_usize("SPAM_PIPELINE_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        let classifier_workers = env_usize("SPAM_PIPELINE_CLASSIFIER_WORKERS")?
            .unwrap_or(DEFAULT_CLASSIFIER_WORKERS);

        let config = Self {
            batch_size,
            classifier_workers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the stages cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.classifier_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "classifier_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings for the in-memory `SimulatedService`.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Latency of a single user lookup.
    pub lookup_latency: Duration,
    /// Latency of one batched message fetch.
    pub fetch_latency: Duration,
    /// Latency of a single spam check.
    pub check_latency: Duration,
    /// Random extra latency added to every call, up to this bound.
    pub jitter: Duration,
    /// Concurrent spam checks tolerated before `RateLimited` is returned.
    pub max_concurrent_checks: usize,
    /// Messages generated per user when none are registered explicitly.
    pub messages_per_user: usize,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            lookup_latency: Duration::from_millis(10),
            fetch_latency: Duration::from_millis(20),
            check_latency: Duration::from_millis(15),
            jitter: Duration::from_millis(5),
            max_concurrent_checks: DEFAULT_CLASSIFIER_WORKERS,
            messages_per_user: 3,
        }
    }
}

impl SimulatedConfig {
    /// Zero latency, no jitter. Used by tests.
    pub fn instant() -> Self {
        Self {
            lookup_latency: Duration::ZERO,
            fetch_latency: Duration::ZERO,
            check_latency: Duration::ZERO,
            jitter: Duration::ZERO,
            ..Default::default()
        }
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?} is not a positive integer: {e}"),
            }),
        Err(_) => Ok(None),
    }
}
