//! Storage for Cachet.
//!
//! Two layers live here:
//!
//! - [`KvStore`]: a hierarchical key-value store with write-once and
//!   compare-and-swap primitives. Every other component (ledger, queue,
//!   liveness tracker) persists through it.
//! - [`ContentStore`]: write-once, content-addressed value storage on top of
//!   any `KvStore`, plus the pack/unpack conversions between argument
//!   snapshot flavors.
//!
//! # Backends
//!
//! - [`InMemoryKvStore`]: `BTreeMap`-based store for tests and embedding
//! - [`FsKvStore`]: directory tree shared safely between processes
//!
//! # Design Rules
//!
//! 1. Content-addressed values are immutable once written.
//! 2. Same address with different bytes is a consistency violation, never
//!    an overwrite.
//! 3. Readers never see partially written values.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod content;
pub mod error;
pub mod fs;
pub mod key;
pub mod memory;
pub mod pack;
pub mod traits;

pub use content::{Addressable, ContentStore, VALUES_NAMESPACE};
pub use error::{StoreError, StoreResult};
pub use fs::{FsKvStore, FsStoreConfig};
pub use key::{validate_segment, StoreKey};
pub use memory::InMemoryKvStore;
pub use traits::{KvStore, WriteOutcome};
