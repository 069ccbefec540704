use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::descendant::validate_process_type;
use crate::error::{SwarmError, SwarmResult};

/// Claim policy of the [`ExecutionQueue`](crate::ExecutionQueue).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts without a result after which a signature is no longer
    /// offered to workers.
    pub max_attempts: u32,
    /// Wait after the n-th unfinished attempt is `retry_base_delay_ms * 2^(n-1)`.
    pub retry_base_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_delay_ms: 1_000,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> SwarmResult<()> {
        if self.max_attempts == 0 {
            return Err(SwarmError::InvalidConfig(
                "queue.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Back-off before re-offering a signature that has `attempts`
    /// unfinished attempts.
    pub fn retry_delay(&self, attempts: usize) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempts - 1).min(20) as u32;
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1 << exponent))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between polls of an empty queue.
    pub poll_interval_ms: u64,
    /// Random extra sleep, up to this much, so idle workers drift apart.
    pub idle_jitter_ms: u64,
    /// Label under which workers register in the liveness tracker.
    pub process_type: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            idle_jitter_ms: 200,
            process_type: "worker".into(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> SwarmResult<()> {
        validate_process_type(&self.process_type)?;
        if self.poll_interval_ms == 0 {
            return Err(SwarmError::InvalidConfig(
                "worker.poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Size of a [`WorkerPool`](crate::WorkerPool).
///
/// `exact_workers` wins when set. Otherwise the target is `max_workers`
/// capped at available CPUs + 2, and never below `min_workers`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub exact_workers: Option<usize>,
    pub min_workers: usize,
    pub max_workers: usize,
    /// Sleep between maintenance rounds.
    pub maintain_interval_ms: u64,
    /// Grace period before escalating from SIGTERM to SIGKILL.
    pub terminate_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            exact_workers: None,
            min_workers: 0,
            max_workers: 10,
            maintain_interval_ms: 1_000,
            terminate_timeout_ms: 3_000,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> SwarmResult<()> {
        if self.exact_workers.is_none() && self.min_workers > self.max_workers {
            return Err(SwarmError::InvalidConfig(format!(
                "pool.min_workers ({}) exceeds pool.max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        Ok(())
    }

    pub fn target(&self, available_cpus: usize) -> usize {
        match self.exact_workers {
            Some(exact) => exact,
            None => self
                .max_workers
                .min(available_cpus + 2)
                .max(self.min_workers),
        }
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles() {
        let config = QueueConfig {
            max_attempts: 5,
            retry_base_delay_ms: 100,
        };
        assert_eq!(config.retry_delay(0), Duration::ZERO);
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
        assert_eq!(config.retry_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let config = QueueConfig {
            max_attempts: 0,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pool_target() {
        let exact = PoolConfig {
            exact_workers: Some(3),
            ..PoolConfig::default()
        };
        assert_eq!(exact.target(64), 3);

        let bounded = PoolConfig {
            min_workers: 2,
            max_workers: 8,
            ..PoolConfig::default()
        };
        assert_eq!(bounded.target(1), 3);
        assert_eq!(bounded.target(64), 8);

        let floor = PoolConfig {
            min_workers: 6,
            max_workers: 8,
            ..PoolConfig::default()
        };
        assert_eq!(floor.target(1), 6);
    }

    #[test]
    fn inverted_bounds_are_invalid() {
        let config = PoolConfig {
            min_workers: 9,
            max_workers: 2,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn worker_defaults_validate() {
        assert!(WorkerConfig::default().validate().is_ok());
        let bad = WorkerConfig {
            process_type: "a b".into(),
            ..WorkerConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
