use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

const DEFAULT_FLUSH_PERIOD_MS: u64 = 60_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 60_000;

/// Settings of the buffered state and stats persistence of one sync attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncPersistenceConfig {
    /// Period between two background flushes. The first flush runs as soon as
    /// the background task starts.
    #[serde(default = "default_flush_period_ms")]
    pub flush_period_ms: u64,
    /// How long shutdown waits for an in-flight flush before giving up on the
    /// final flush.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Retry policy of the final flush performed on shutdown.
    #[serde(default)]
    pub final_flush_retry: RetryConfig,
}

fn default_flush_period_ms() -> u64 {
    DEFAULT_FLUSH_PERIOD_MS
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl SyncPersistenceConfig {
    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.flush_period_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.flush_period_ms == 0 {
            return Err(ValidationError::FlushPeriodZero);
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(ValidationError::ShutdownTimeoutZero);
        }

        self.final_flush_retry.validate()
    }
}

impl Default for SyncPersistenceConfig {
    fn default() -> Self {
        Self {
            flush_period_ms: DEFAULT_FLUSH_PERIOD_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            final_flush_retry: RetryConfig::default(),
        }
    }
}
