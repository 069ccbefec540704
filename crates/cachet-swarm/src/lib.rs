//! Distributing call signatures over worker processes.
//!
//! This crate provides:
//! - [`ExecutionQueue`]: enqueue, claim, retire, with at-least-once dispatch
//! - [`Worker`]: the poll-claim-execute-retire loop
//! - [`WorkerPool`]: keeps a target number of worker processes running
//! - [`LivenessTracker`]: which spawned processes are still alive, keyed by
//!   process id *and* start time so recycled ids are not mistaken for
//!   the original process

pub mod config;
pub mod descendant;
pub mod error;
pub mod pool;
pub mod process;
pub mod queue;
pub mod tracker;
pub mod worker;

pub use config::{PoolConfig, QueueConfig, WorkerConfig};
pub use descendant::{validate_process_type, DescendantProcessInfo, ProcessIdentity};
pub use error::{SwarmError, SwarmResult};
pub use pool::{CommandFactory, PoolStatus, WorkerPool};
pub use process::{
    process_is_alive, start_time_with_retry, ProcessProbe, ProcessStatus, Signal, SystemProbe,
    BOOT_TIME_SKEW_SECONDS,
};
pub use queue::{
    Claim, ClaimRecord, EnqueueOutcome, ExecutionQueue, QueueEntry, QUEUE_NAMESPACE,
};
pub use tracker::{LivenessTracker, PROCESSES_NAMESPACE};
pub use worker::{Worker, WorkerStats, WorkerStep};
