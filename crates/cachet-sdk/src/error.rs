use std::time::Duration;

use cachet_cache::CacheError;
use cachet_ledger::LedgerError;
use cachet_store::StoreError;
use cachet_swarm::SwarmError;
use cachet_types::{ErrorKind, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("no store was supplied and none is active")]
    NoActiveStore,

    #[error("timed out after {0:?} waiting for a result")]
    Timeout(Duration),

    /// A worker ran the call and it raised.
    #[error("remote execution crashed: {exception_type}: {message}")]
    RemoteCrash {
        exception_type: String,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read configuration file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Swarm(#[from] SwarmError),
}

impl SdkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoActiveStore | Self::InvalidConfig(_) => ErrorKind::Validation,
            Self::Timeout(_) | Self::ConfigFile { .. } => ErrorKind::Infrastructure,
            Self::RemoteCrash { .. } => ErrorKind::ExecutionCrash,
            Self::Type(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Ledger(e) => e.kind(),
            Self::Cache(e) => e.kind(),
            Self::Swarm(e) => e.kind(),
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
