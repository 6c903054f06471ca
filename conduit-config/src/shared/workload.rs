use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the workload service and its dispatch queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// How long a polled queue entry stays leased before it is handed out again.
    #[serde(default = "default_queue_poll_redelivery_ms")]
    pub queue_poll_redelivery_ms: u64,
    /// Number of workloads returned by a poll when the caller does not ask for a quantity.
    #[serde(default = "default_poll_quantity")]
    pub default_poll_quantity: u32,
}

fn default_queue_poll_redelivery_ms() -> u64 {
    60_000
}

fn default_poll_quantity() -> u32 {
    10
}

impl WorkloadConfig {
    pub fn queue_poll_redelivery(&self) -> Duration {
        Duration::from_millis(self.queue_poll_redelivery_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_poll_quantity == 0 {
            return Err(ValidationError::PollQuantityZero);
        }

        Ok(())
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            queue_poll_redelivery_ms: default_queue_poll_redelivery_ms(),
            default_poll_quantity: default_poll_quantity(),
        }
    }
}
