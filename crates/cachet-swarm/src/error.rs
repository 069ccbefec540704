use cachet_cache::CacheError;
use cachet_ledger::LedgerError;
use cachet_store::StoreError;
use cachet_types::ErrorKind;

/// Errors from queue, worker and liveness operations.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{name} must be a positive process id, got {value}")]
    InvalidProcessId { name: &'static str, value: i64 },

    #[error("{name} must be within boot-time window [{min}, {max}], got {value}")]
    StartTimeOutOfWindow {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("invalid process type '{value}': {reason}")]
    InvalidProcessType { value: String, reason: String },

    #[error("could not read the start time of process {pid} after {attempts} attempts")]
    StartTimeUnavailable { pid: u32, attempts: u32 },

    #[error("timeout must be non-negative and finite, got {0}")]
    InvalidTimeout(String),

    #[error("invalid swarm configuration: {0}")]
    InvalidConfig(String),
}

impl SwarmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Ledger(e) => e.kind(),
            Self::Cache(e) => e.kind(),
            Self::Io(_) | Self::Serialization(_) | Self::StartTimeUnavailable { .. } => {
                ErrorKind::Infrastructure
            }
            Self::InvalidProcessId { .. }
            | Self::StartTimeOutOfWindow { .. }
            | Self::InvalidProcessType { .. }
            | Self::InvalidTimeout(_)
            | Self::InvalidConfig(_) => ErrorKind::Validation,
        }
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for swarm operations.
pub type SwarmResult<T> = Result<T, SwarmError>;
