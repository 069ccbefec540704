use std::fmt;
use std::sync::OnceLock;

use cachet_store::{Addressable, ContentStore};
use cachet_types::{AddressedArgs, MaterializedArgs, RawArgs, ValueAddress};
use serde::{Deserialize, Serialize};

use crate::error::LedgerResult;
use crate::function::FunctionIdentity;

/// One specific invocation: a function plus its addressed arguments.
///
/// The signature's own content address is the cache key for the call.
/// Equal functions with equal argument values always produce the same
/// signature address, no matter how the arguments were supplied.
#[derive(Clone, Serialize, Deserialize)]
pub struct CallSignature {
    function: ValueAddress,
    arguments: AddressedArgs,
    #[serde(skip)]
    address: OnceLock<ValueAddress>,
}

impl CallSignature {
    /// Store the function identity and pack the arguments.
    pub fn new(
        store: &ContentStore,
        function: &FunctionIdentity,
        arguments: &RawArgs,
    ) -> LedgerResult<Self> {
        let function = store.put(function)?;
        let arguments = store.pack(arguments)?;
        Ok(Self::from_parts(function, arguments))
    }

    pub fn from_parts(function: ValueAddress, arguments: AddressedArgs) -> Self {
        Self {
            function,
            arguments,
            address: OnceLock::new(),
        }
    }

    /// Address of the stored [`FunctionIdentity`].
    pub fn function(&self) -> &ValueAddress {
        &self.function
    }

    pub fn arguments(&self) -> &AddressedArgs {
        &self.arguments
    }

    /// Content address of this signature. Computed once, then memoized.
    pub fn address(&self) -> LedgerResult<ValueAddress> {
        if let Some(address) = self.address.get() {
            return Ok(address.clone());
        }
        let address = ContentStore::address_of(self)?;
        Ok(self.address.get_or_init(|| address).clone())
    }

    /// Write the signature itself to the store so other processes can load
    /// it by address.
    pub fn persist(&self, store: &ContentStore) -> LedgerResult<ValueAddress> {
        let address = store.put(self)?;
        let _ = self.address.set(address.clone());
        Ok(address)
    }

    /// Load a persisted signature.
    pub fn load(store: &ContentStore, address: &ValueAddress) -> LedgerResult<Self> {
        let signature: Self = store.get(address)?;
        let _ = signature.address.set(address.clone());
        Ok(signature)
    }

    pub fn function_identity(&self, store: &ContentStore) -> LedgerResult<FunctionIdentity> {
        Ok(store.get(&self.function)?)
    }

    /// Resolve the arguments into values for the function body.
    pub fn materialize(&self, store: &ContentStore) -> LedgerResult<MaterializedArgs> {
        Ok(store.unpack(&self.arguments)?)
    }

    /// Ledger partition for this signature's function, e.g. `fn_factorial`.
    pub fn function_segment(&self) -> &str {
        self.function.descriptor()
    }
}

impl Addressable for CallSignature {
    fn descriptor(&self) -> String {
        format!("call_{}", self.function.descriptor())
    }
}

impl PartialEq for CallSignature {
    fn eq(&self, other: &Self) -> bool {
        self.function == other.function && self.arguments == other.arguments
    }
}

impl Eq for CallSignature {}

impl fmt::Debug for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSignature")
            .field("function", &self.function)
            .field("arguments", &self.arguments)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use cachet_store::InMemoryKvStore;
    use cachet_types::Value;

    fn store() -> ContentStore {
        ContentStore::new(Arc::new(InMemoryKvStore::new()))
    }

    fn factorial() -> FunctionIdentity {
        FunctionIdentity::new("factorial", "1").unwrap()
    }

    #[test]
    fn equal_calls_share_an_address() {
        let store = store();
        let args = RawArgs::new().with("n", 5i64).unwrap();
        let a = CallSignature::new(&store, &factorial(), &args).unwrap();
        let b = CallSignature::new(&store, &factorial(), &args).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.address().unwrap(), b.address().unwrap());
        assert_eq!(a.address().unwrap().descriptor(), "call_fn_factorial");
    }

    #[test]
    fn argument_insertion_order_does_not_matter() {
        let store = store();
        let ab = RawArgs::new().with("a", 1i64).unwrap().with("b", 2i64).unwrap();
        let ba = RawArgs::new().with("b", 2i64).unwrap().with("a", 1i64).unwrap();
        let x = CallSignature::new(&store, &factorial(), &ab).unwrap();
        let y = CallSignature::new(&store, &factorial(), &ba).unwrap();
        assert_eq!(x.address().unwrap(), y.address().unwrap());
    }

    #[test]
    fn passing_an_address_is_the_same_call() {
        let store = store();
        let five = store.put(&Value::from(5i64)).unwrap();
        let by_value = RawArgs::new().with("n", 5i64).unwrap();
        let by_address = RawArgs::new().with("n", five).unwrap();
        let x = CallSignature::new(&store, &factorial(), &by_value).unwrap();
        let y = CallSignature::new(&store, &factorial(), &by_address).unwrap();
        assert_eq!(x.address().unwrap(), y.address().unwrap());
    }

    #[test]
    fn versions_and_arguments_distinguish_calls() {
        let store = store();
        let args = RawArgs::new().with("n", 5i64).unwrap();
        let v1 = CallSignature::new(&store, &factorial(), &args).unwrap();
        let v2 = CallSignature::new(
            &store,
            &FunctionIdentity::new("factorial", "2").unwrap(),
            &args,
        )
        .unwrap();
        let other = CallSignature::new(
            &store,
            &factorial(),
            &RawArgs::new().with("n", 6i64).unwrap(),
        )
        .unwrap();
        assert_ne!(v1.address().unwrap(), v2.address().unwrap());
        assert_ne!(v1.address().unwrap(), other.address().unwrap());
    }

    #[test]
    fn persist_and_load() {
        let store = store();
        let args = RawArgs::new().with("n", 3i64).unwrap();
        let signature = CallSignature::new(&store, &factorial(), &args).unwrap();
        let address = signature.persist(&store).unwrap();
        assert_eq!(address, signature.address().unwrap());

        let loaded = CallSignature::load(&store, &address).unwrap();
        assert_eq!(loaded, signature);
        assert_eq!(loaded.function_identity(&store).unwrap(), factorial());
        assert_eq!(loaded.materialize(&store).unwrap().int("n").unwrap(), 3);
        assert_eq!(loaded.function_segment(), "fn_factorial");
    }
}
