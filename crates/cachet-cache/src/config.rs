use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Configuration for [`IdempotentCache`](crate::IdempotentCache).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Probability in `[0, 1]` that a cache hit is re-executed and compared
    /// against the recorded result.
    pub consistency_check_probability: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            consistency_check_probability: 0.0,
        }
    }
}

impl CacheConfig {
    /// Re-execute every cache hit.
    pub fn always_verify() -> Self {
        Self {
            consistency_check_probability: 1.0,
        }
    }

    pub fn validate(&self) -> CacheResult<()> {
        let p = self.consistency_check_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(CacheError::InvalidConfig(format!(
                "consistency_check_probability must be within [0, 1], got {p}"
            )));
        }
        Ok(())
    }
}
