use std::fmt;

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid type descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    #[error("invalid argument name '{name}': {reason}")]
    InvalidArgumentName { name: String, reason: String },

    #[error("missing argument '{name}'")]
    MissingArgument { name: String },

    #[error("argument '{name}' has type {actual}, expected {expected}")]
    ArgumentType {
        name: String,
        expected: &'static str,
        actual: String,
    },

    /// A raw snapshot was placed directly as the value of another raw snapshot.
    #[error("argument '{key}' is a raw snapshot; raw snapshots cannot be nested directly")]
    NestedRawArgs { key: String },

    /// A materialized snapshot was handed an unresolved address.
    #[error("argument '{key}' is a value address; materialized snapshots hold resolved values")]
    UnresolvedAddress { key: String },

    #[error("value nesting depth {depth} exceeds limit {limit}")]
    NestingTooDeep { depth: usize, limit: usize },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification shared by every error type in the workspace.
///
/// Callers use it to decide whether a failure is worth retrying without
/// matching on each crate's concrete error enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An address, key, or record does not exist.
    NotFound,
    /// Stored content disagrees with its address, or a recomputation
    /// disagreed with a cached result.
    ConsistencyViolation,
    /// Input was rejected before any side effect happened.
    Validation,
    /// A pure function raised while executing.
    ExecutionCrash,
    /// I/O, serialization, lock or process-table failures.
    Infrastructure,
}

impl ErrorKind {
    /// Whether an operation failing with this kind may succeed on retry.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Infrastructure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not_found",
            Self::ConsistencyViolation => "consistency_violation",
            Self::Validation => "validation",
            Self::ExecutionCrash => "execution_crash",
            Self::Infrastructure => "infrastructure",
        };
        f.write_str(label)
    }
}

impl TypeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Serialization(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Validation,
        }
    }
}
