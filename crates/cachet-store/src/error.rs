use cachet_crypto::HasherError;
use cachet_types::{ErrorKind, TypeError, ValueAddress};

/// Errors from key-value and content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No value is stored under the address.
    #[error("value not found: {0}")]
    NotFound(ValueAddress),

    /// Stored bytes disagree with the address they are filed under.
    #[error("consistency violation at {address}: {reason}")]
    ConsistencyViolation {
        address: ValueAddress,
        reason: String,
    },

    /// A key segment failed validation.
    #[error("invalid store key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A value or snapshot failed validation.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A per-key lock could not be acquired in time.
    #[error("timed out after {waited_ms}ms waiting for lock on '{key}'")]
    LockTimeout { key: String, waited_ms: u64 },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ConsistencyViolation { .. } => ErrorKind::ConsistencyViolation,
            Self::InvalidKey { .. } => ErrorKind::Validation,
            Self::Type(e) => e.kind(),
            Self::Serialization(_) | Self::Io(_) | Self::LockTimeout { .. } => {
                ErrorKind::Infrastructure
            }
        }
    }
}

impl From<HasherError> for StoreError {
    fn from(err: HasherError) -> Self {
        match err {
            HasherError::Serialization(msg) => Self::Serialization(msg),
            HasherError::Type(e) => Self::Type(e),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
