use cachet_ledger::{FunctionError, LedgerError};
use cachet_store::StoreError;
use cachet_types::{ErrorKind, ValueAddress};

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The function raised. The crash is already in the ledger; this is the
    /// original error, re-raised to the caller.
    #[error("execution crashed: {0}")]
    ExecutionCrash(FunctionError),

    /// Re-executing a cached call produced a different result.
    #[error("consistency violation for {signature}: cached {cached}, recomputed {recomputed}")]
    ConsistencyViolation {
        signature: ValueAddress,
        cached: ValueAddress,
        recomputed: ValueAddress,
    },

    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ledger(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::ExecutionCrash(_) => ErrorKind::ExecutionCrash,
            Self::ConsistencyViolation { .. } => ErrorKind::ConsistencyViolation,
            Self::InvalidConfig(_) => ErrorKind::Validation,
        }
    }
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
