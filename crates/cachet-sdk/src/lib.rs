//! High-level SDK for Cachet.
//!
//! [`Cachet`] ties a store, the result cache and the swarm queue together.
//! This is the main entry point for applications embedding Cachet.

pub mod cachet;
pub mod config;
pub mod error;
pub mod resolver;
pub mod status;

pub use cachet::{Cachet, CachetBuilder};
pub use config::{CachetConfig, WaitConfig};
pub use error::{SdkError, SdkResult};
pub use resolver::{ActiveStoreResolver, EnvStoreResolver, FixedStore, STORE_ENV_VAR};
pub use status::StatusSummary;

// Re-export key types
pub use cachet_cache::CachedCall;
pub use cachet_ledger::{
    pure_fn, CallSignature, ExecutionContext, FunctionError, FunctionIdentity, FunctionRegistry,
    PureFunction,
};
pub use cachet_swarm::{EnqueueOutcome, ProcessIdentity, Worker, WorkerPool};
pub use cachet_types::{MaterializedArgs, RawArgs, Value, ValueAddress};
