use std::path::Path;
use std::time::Duration;

use cachet_cache::CacheConfig;
use cachet_store::FsStoreConfig;
use cachet_swarm::{PoolConfig, QueueConfig, WorkerConfig};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Polling schedule of [`Cachet::wait_for_result`](crate::Cachet::wait_for_result).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// First sleep; each later sleep roughly doubles.
    pub initial_backoff_ms: u64,
    /// Upper bound of a single sleep.
    pub max_backoff_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl WaitConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Every tunable, as read from `cachet.toml`.
///
/// ```toml
/// [cache]
/// consistency_check_probability = 0.05
///
/// [queue]
/// max_attempts = 3
///
/// [pool]
/// exact_workers = 4
/// ```
///
/// Missing sections and fields take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachetConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub pool: PoolConfig,
    pub store: FsStoreConfig,
    pub wait: WaitConfig,
}

impl CachetConfig {
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SdkError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SdkError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> SdkResult<()> {
        self.cache.validate()?;
        self.queue.validate()?;
        self.worker.validate()?;
        self.pool.validate()?;
        if self.wait.initial_backoff_ms == 0
            || self.wait.max_backoff_ms < self.wait.initial_backoff_ms
        {
            return Err(SdkError::InvalidConfig(
                "wait.initial_backoff_ms must be positive and at most wait.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}
