use std::sync::Arc;

use cachet_crypto::ContentHasher;
use cachet_types::{TypeError, Value, ValueAddress};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::key::StoreKey;
use crate::traits::{KvStore, WriteOutcome};

/// Namespace under which content-addressed values live.
pub const VALUES_NAMESPACE: &str = "values";

/// Anything that can be written to the content store.
///
/// The canonical bytes of a value are its bincode encoding; the descriptor
/// becomes part of both the hash input and the storage key.
pub trait Addressable: Serialize + DeserializeOwned {
    /// Short type descriptor, e.g. `int` or `list_len_3`.
    fn descriptor(&self) -> String;

    /// Reject values that must never be stored.
    fn validate(&self) -> Result<(), TypeError> {
        Ok(())
    }
}

impl Addressable for Value {
    fn descriptor(&self) -> String {
        Value::descriptor(self)
    }

    fn validate(&self) -> Result<(), TypeError> {
        self.check_depth()
    }
}

/// Write-once, content-addressed value storage over any [`KvStore`].
///
/// Values are filed under `values/<descriptor>/<hash>`. Writing the same
/// content twice is a no-op; finding different bytes under an existing
/// address is a [`StoreError::ConsistencyViolation`].
#[derive(Clone)]
pub struct ContentStore {
    backend: Arc<dyn KvStore>,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn KvStore> {
        &self.backend
    }

    /// Storage key for an address.
    pub fn key_for(address: &ValueAddress) -> StoreResult<StoreKey> {
        StoreKey::new([
            VALUES_NAMESPACE.to_string(),
            address.descriptor().to_string(),
            address.to_hex(),
        ])
    }

    /// Canonical bytes and address of `value`, without storing it.
    pub fn encode<T: Addressable>(value: &T) -> StoreResult<(ValueAddress, Vec<u8>)> {
        value.validate()?;
        let bytes = ContentHasher::encode(value)?;
        let address = ContentHasher::VALUE.address(&value.descriptor(), &bytes)?;
        Ok((address, bytes))
    }

    /// Address `value` would be stored under.
    pub fn address_of<T: Addressable>(value: &T) -> StoreResult<ValueAddress> {
        Ok(Self::encode(value)?.0)
    }

    /// Store `value` and return its address.
    pub fn put<T: Addressable>(&self, value: &T) -> StoreResult<ValueAddress> {
        let (address, bytes) = Self::encode(value)?;
        let key = Self::key_for(&address)?;
        match self.backend.write_once(&key, &bytes)? {
            WriteOutcome::Written => {
                debug!(address = %address.short(), size = bytes.len(), "stored value");
            }
            WriteOutcome::Exists(existing) if existing == bytes => {}
            WriteOutcome::Exists(_) => {
                warn!(address = %address.short(), "existing bytes differ from new content");
                return Err(StoreError::ConsistencyViolation {
                    address,
                    reason: "different content is already stored under this address".into(),
                });
            }
        }
        Ok(address)
    }

    /// Load and decode the value stored at `address`.
    pub fn get<T: Addressable>(&self, address: &ValueAddress) -> StoreResult<T> {
        let key = Self::key_for(address)?;
        let bytes = self
            .backend
            .read(&key)?
            .ok_or_else(|| StoreError::NotFound(address.clone()))?;
        if !ContentHasher::VALUE.verify(&bytes, address) {
            return Err(StoreError::ConsistencyViolation {
                address: address.clone(),
                reason: "stored bytes do not hash to their address".into(),
            });
        }
        bincode::deserialize(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn contains(&self, address: &ValueAddress) -> StoreResult<bool> {
        self.backend.exists(&Self::key_for(address)?)
    }

    /// Number of stored values.
    pub fn count(&self) -> StoreResult<usize> {
        self.backend.count(&StoreKey::new([VALUES_NAMESPACE])?)
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore").finish_non_exhaustive()
    }
}
