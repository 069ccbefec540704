use crate::error::StoreResult;
use crate::key::StoreKey;

/// Result of a [`KvStore::write_once`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The key was empty and now holds the new bytes.
    Written,
    /// The key already held a value; it was left untouched and is returned.
    Exists(Vec<u8>),
}

/// Hierarchical key-value store shared by every Cachet component.
///
/// All implementations must satisfy these invariants:
/// - `write_once` never overwrites: of several concurrent writers to an
///   empty key exactly one observes [`WriteOutcome::Written`].
/// - `compare_and_swap` is atomic with respect to every other
///   `compare_and_swap` and `write_once` on the same key, including across
///   processes for persistent backends.
/// - A reader never observes a partially written value.
/// - `list` returns keys in ascending order.
/// - All I/O errors are propagated, never silently ignored.
pub trait KvStore: Send + Sync {
    /// Read the bytes stored under `key`, or `None` if absent.
    fn read(&self, key: &StoreKey) -> StoreResult<Option<Vec<u8>>>;

    /// Unconditionally store `value` under `key`.
    fn write(&self, key: &StoreKey, value: &[u8]) -> StoreResult<()>;

    /// Store `value` only if `key` is empty.
    fn write_once(&self, key: &StoreKey, value: &[u8]) -> StoreResult<WriteOutcome>;

    /// Replace the value under `key` with `new` if it currently equals
    /// `expected`. `None` on either side means "absent": `expected = None`
    /// claims an empty key and `new = None` deletes it.
    ///
    /// Returns `true` if the swap happened.
    fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> StoreResult<bool>;

    /// Remove `key`. Returns `true` if it existed.
    fn delete(&self, key: &StoreKey) -> StoreResult<bool>;

    /// Every stored key equal to or below `prefix`, in ascending order.
    fn list(&self, prefix: &StoreKey) -> StoreResult<Vec<StoreKey>>;

    fn exists(&self, key: &StoreKey) -> StoreResult<bool> {
        Ok(self.read(key)?.is_some())
    }

    /// Number of keys below `prefix`.
    ///
    /// Default implementation counts the result of `list()`.
    fn count(&self, prefix: &StoreKey) -> StoreResult<usize> {
        Ok(self.list(prefix)?.len())
    }
}
