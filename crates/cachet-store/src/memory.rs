use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::StoreResult;
use crate::key::StoreKey;
use crate::traits::{KvStore, WriteOutcome};

/// In-memory, `BTreeMap`-based key-value store.
///
/// Intended for tests and single-process embedding. Every operation holds
/// the map lock for its whole duration, which makes `write_once` and
/// `compare_and_swap` trivially atomic.
pub struct InMemoryKvStore {
    entries: RwLock<BTreeMap<StoreKey, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored values.
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .map(|v| v.len() as u64)
            .sum()
    }

    pub fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for InMemoryKvStore {
    fn read(&self, key: &StoreKey) -> StoreResult<Option<Vec<u8>>> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn write(&self, key: &StoreKey, value: &[u8]) -> StoreResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        map.insert(key.clone(), value.to_vec());
        Ok(())
    }

    fn write_once(&self, key: &StoreKey, value: &[u8]) -> StoreResult<WriteOutcome> {
        let mut map = self.entries.write().expect("lock poisoned");
        if let Some(existing) = map.get(key) {
            return Ok(WriteOutcome::Exists(existing.clone()));
        }
        map.insert(key.clone(), value.to_vec());
        Ok(WriteOutcome::Written)
    }

    fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> StoreResult<bool> {
        let mut map = self.entries.write().expect("lock poisoned");
        if map.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        match new {
            Some(bytes) => {
                map.insert(key.clone(), bytes.to_vec());
            }
            None => {
                map.remove(key);
            }
        }
        Ok(true)
    }

    fn delete(&self, key: &StoreKey) -> StoreResult<bool> {
        let mut map = self.entries.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    fn list(&self, prefix: &StoreKey) -> StoreResult<Vec<StoreKey>> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

impl std::fmt::Debug for InMemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKvStore")
            .field("entry_count", &self.len())
            .finish()
    }
}
