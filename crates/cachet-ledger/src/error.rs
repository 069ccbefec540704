use cachet_store::StoreError;
use cachet_types::{ErrorKind, TypeError};

/// Errors produced by ledger and execution operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid function name '{name}': {reason}")]
    InvalidFunctionName { name: String, reason: String },

    #[error("no function registered as {identity}")]
    UnknownFunction { identity: String },

    #[error("function {identity} is already registered")]
    DuplicateFunction { identity: String },

    /// The function cannot be executed by another process.
    #[error("function {identity} is not relocatable")]
    NotRelocatable { identity: String },

    /// Two different records were appended under the same record id.
    #[error("conflicting ledger record at '{key}'")]
    RecordConflict { key: String },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Type(e) => e.kind(),
            Self::Serialization(_) => ErrorKind::Infrastructure,
            Self::UnknownFunction { .. } => ErrorKind::NotFound,
            Self::InvalidFunctionName { .. }
            | Self::DuplicateFunction { .. }
            | Self::NotRelocatable { .. } => ErrorKind::Validation,
            Self::RecordConflict { .. } => ErrorKind::ConsistencyViolation,
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
