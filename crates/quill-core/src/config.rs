use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Tuning for one state-machine runtime instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineConfig {
    /// Maximum number of entities leased per handler per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay between scheduler ticks, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Failed attempts tolerated within one state before escalation.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Base of the exponential retry backoff, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound of the retry backoff, in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Lease lifetime, in milliseconds. Must exceed the slowest handler.
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,
    /// Time an in-flight tick is given to finish on shutdown, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_batch_size() -> usize {
    5
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_retry_limit() -> u32 {
    7
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_lease_duration_ms() -> u64 {
    60_000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tick_interval_ms: default_tick_interval_ms(),
            retry_limit: default_retry_limit(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            lease_duration_ms: default_lease_duration_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl StateMachineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Reject settings the runtime cannot honor.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.batch_size == 0 {
            return Err(CoreError::Configuration("batch_size must be at least 1".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(CoreError::Configuration("tick_interval_ms must be positive".into()));
        }
        if self.lease_duration_ms == 0 {
            return Err(CoreError::Configuration("lease_duration_ms must be positive".into()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(CoreError::Configuration(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Convert a std duration into a chrono one, saturating at the largest
/// representable millisecond count.
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2);
    chrono::Duration::milliseconds(millis)
}
