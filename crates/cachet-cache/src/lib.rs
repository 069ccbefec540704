//! Memoized execution of pure functions.
//!
//! [`IdempotentCache::get_or_compute`] returns the recorded result of a call
//! signature when one exists and runs the function otherwise. A configurable
//! fraction of cache hits is re-executed to catch functions that are not as
//! pure as they claim.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CachedCall, IdempotentCache};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
