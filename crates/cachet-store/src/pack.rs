//! Conversions between argument snapshot flavors.
//!
//! `pack` turns caller-supplied arguments into their addressed form, which
//! is what call identity is computed from. `unpack` resolves an addressed
//! snapshot into values a function body can use.

use std::collections::BTreeMap;

use cachet_types::{AddressedArgs, MaterializedArgs, RawArgs, Snapshot, Value, ValueAddress};

use crate::content::ContentStore;
use crate::error::{StoreError, StoreResult};

impl ContentStore {
    /// Store every argument value and return the addressed snapshot.
    ///
    /// Values that are already addresses pass through unchanged, which
    /// makes packing idempotent: `pack(pack(s).to_raw()) == pack(s)`.
    /// Raw snapshots nested anywhere inside a value are packed first so the
    /// stored value never embeds a raw snapshot. Every address reachable
    /// from the arguments must already be stored.
    pub fn pack(&self, raw: &RawArgs) -> StoreResult<AddressedArgs> {
        let mut packed = AddressedArgs::new();
        for (name, value) in raw {
            let address = match value {
                Value::Address(address) => {
                    self.require(address)?;
                    address.clone()
                }
                other => {
                    other.check_depth()?;
                    let normalized = self.normalize(other.clone())?;
                    self.put(&normalized)?
                }
            };
            packed.insert(name.clone(), address)?;
        }
        Ok(packed)
    }

    /// Resolve every address of an addressed snapshot.
    pub fn unpack(&self, packed: &AddressedArgs) -> StoreResult<MaterializedArgs> {
        let mut materialized = MaterializedArgs::new();
        for (name, address) in packed.iter() {
            let value: Value = self.get(address)?;
            materialized.insert(name.clone(), value)?;
        }
        Ok(materialized)
    }

    fn normalize(&self, value: Value) -> StoreResult<Value> {
        match value {
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|item| self.normalize(item))
                    .collect::<StoreResult<_>>()?,
            )),
            Value::Map(entries) => Ok(Value::Map(self.normalize_entries(entries)?)),
            Value::Args(Snapshot::Raw(raw)) => Ok(Value::Args(Snapshot::Addressed(self.pack(&raw)?))),
            Value::Args(Snapshot::Materialized(args)) => {
                let entries = self.normalize_entries(args.into_inner())?;
                Ok(Value::Args(Snapshot::Materialized(MaterializedArgs::try_from(
                    entries,
                )?)))
            }
            Value::Args(Snapshot::Addressed(args)) => {
                for address in args.addresses() {
                    self.require(address)?;
                }
                Ok(Value::Args(Snapshot::Addressed(args)))
            }
            Value::Address(address) => {
                self.require(&address)?;
                Ok(Value::Address(address))
            }
            scalar => Ok(scalar),
        }
    }

    fn normalize_entries(
        &self,
        entries: BTreeMap<String, Value>,
    ) -> StoreResult<BTreeMap<String, Value>> {
        entries
            .into_iter()
            .map(|(k, v)| Ok((k, self.normalize(v)?)))
            .collect()
    }

    fn require(&self, address: &ValueAddress) -> StoreResult<()> {
        if self.contains(address)? {
            Ok(())
        } else {
            Err(StoreError::NotFound(address.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::InMemoryKvStore;
    use cachet_types::TypeError;
    use proptest::prelude::*;

    fn store() -> ContentStore {
        ContentStore::new(Arc::new(InMemoryKvStore::new()))
    }

    fn sample() -> RawArgs {
        RawArgs::new()
            .with("n", 5i64)
            .unwrap()
            .with("label", "five")
            .unwrap()
            .with("items", vec![Value::from(1i64), Value::from(2i64)])
            .unwrap()
    }

    #[test]
    fn pack_replaces_values_with_addresses() {
        let store = store();
        let packed = store.pack(&sample()).unwrap();
        assert_eq!(packed.len(), 3);
        assert_eq!(packed.get("n").unwrap().descriptor(), "int");
        assert_eq!(packed.get("label").unwrap().descriptor(), "str_len_4");
        assert_eq!(packed.get("items").unwrap().descriptor(), "list_len_2");
    }

    #[test]
    fn pack_is_idempotent() {
        let store = store();
        let once = store.pack(&sample()).unwrap();
        let twice = store.pack(&once.to_raw()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unpack_inverts_pack() {
        let store = store();
        let raw = sample();
        let materialized = store.unpack(&store.pack(&raw).unwrap()).unwrap();
        assert_eq!(materialized.to_raw(), raw);
    }

    #[test]
    fn nested_raw_snapshot_is_packed() {
        let store = store();
        let inner = RawArgs::new().with("x", 1i64).unwrap();
        let raw = RawArgs::new()
            .with("batch", vec![Value::from(inner.clone())])
            .unwrap();
        let materialized = store.unpack(&store.pack(&raw).unwrap()).unwrap();

        let batch = materialized.require("batch").unwrap().as_list().unwrap();
        let Value::Args(Snapshot::Addressed(nested)) = &batch[0] else {
            panic!("nested raw snapshot was not packed: {batch:?}");
        };
        assert_eq!(store.unpack(nested).unwrap().to_raw(), inner);
    }

    #[test]
    fn dangling_address_is_rejected() {
        let store = store();
        let dangling = ContentStore::address_of(&Value::from(99i64)).unwrap();
        let raw = RawArgs::new().with("n", dangling).unwrap();
        assert!(matches!(store.pack(&raw), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn unpack_refuses_stored_addresses() {
        let store = store();
        let inner = store.put(&Value::from(1i64)).unwrap();
        let pointer = store.put(&Value::Address(inner)).unwrap();
        let mut packed = AddressedArgs::new();
        packed.insert("p", pointer).unwrap();
        assert!(matches!(
            store.unpack(&packed),
            Err(StoreError::Type(TypeError::UnresolvedAddress { .. }))
        ));
    }

    #[test]
    fn empty_snapshot_packs_to_empty() {
        let store = store();
        let packed = store.pack(&RawArgs::new()).unwrap();
        assert!(packed.is_empty());
        assert!(store.unpack(&packed).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn pack_unpack_roundtrip(
            ints in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..6),
            text in "[a-zA-Z0-9 ]{0,16}",
        ) {
            let store = store();
            let mut raw = RawArgs::new();
            for (k, v) in &ints {
                raw.insert(k.clone(), *v).unwrap();
            }
            raw.insert("text_arg", text.as_str()).unwrap();
            let packed = store.pack(&raw).unwrap();
            prop_assert_eq!(store.pack(&packed.to_raw()).unwrap(), packed.clone());
            prop_assert_eq!(store.unpack(&packed).unwrap().to_raw(), raw);
        }
    }
}
