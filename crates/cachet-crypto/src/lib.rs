//! Content hashing for Cachet.
//!
//! Every stored value is named by a domain-separated BLAKE3 hash of its
//! canonical (bincode) encoding. The hasher wraps the `blake3` crate; there
//! is no custom cryptography here.

pub mod hasher;

pub use hasher::{ContentHasher, HasherError};
