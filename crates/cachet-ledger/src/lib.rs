//! Pure functions and their execution history.
//!
//! This crate provides:
//! - [`FunctionIdentity`], the [`PureFunction`] trait and a [`FunctionRegistry`]
//! - [`CallSignature`]: function plus addressed arguments, the cache key of a call
//! - [`ExecutionLedger`]: append-only attempts, results, crashes, output and events
//! - [`CrashTracker`]: records each propagating failure exactly once
//! - [`Executor`]: runs one attempt and writes it to the ledger

pub mod context;
pub mod crash;
pub mod environment;
pub mod error;
pub mod executor;
pub mod function;
pub mod ledger;
pub mod records;
pub mod signature;

pub use context::{CapturedOutput, ExecutionContext, NestedInvoker, MAX_CALL_DEPTH};
pub use crash::CrashTracker;
pub use environment::{EnvironmentProvider, EnvironmentSummary, SystemEnvironment};
pub use error::{LedgerError, LedgerResult};
pub use executor::{Execution, Executor};
pub use function::{
    pure_fn, AllowAll, FnFunction, FunctionError, FunctionIdentity, FunctionRegistry,
    PureFunction, RelocationPolicy,
};
pub use ledger::{record_id, Collection, ExecutionLedger, SignatureKey};
pub use records::{
    AttemptId, AttemptOutcome, AttemptRecord, CrashRecord, EventRecord, ExecutionRecord,
    ExecutionResult, OutputRecord,
};
pub use signature::CallSignature;
