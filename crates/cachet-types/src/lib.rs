//! Foundation types for Cachet.
//!
//! Every other Cachet crate depends on `cachet-types`.
//!
//! # Key Types
//!
//! - [`ContentHash`]: BLAKE3 digest of a value's canonical bytes
//! - [`ValueAddress`]: content hash plus type descriptor; the permanent name of a stored value
//! - [`Value`]: dynamically typed argument and result values
//! - [`RawArgs`], [`AddressedArgs`], [`MaterializedArgs`]: the three argument snapshot flavors
//! - [`ErrorKind`]: coarse error classification shared across crates

pub mod address;
pub mod args;
pub mod error;
pub mod hash;
pub mod value;

pub use address::{validate_descriptor, ValueAddress};
pub use args::{validate_argument_name, AddressedArgs, MaterializedArgs, RawArgs, Snapshot};
pub use error::{ErrorKind, TypeError};
pub use hash::ContentHash;
pub use value::{Value, MAX_VALUE_DEPTH};
