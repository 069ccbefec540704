//! Argument snapshots.
//!
//! A function's arguments exist in three flavors that are kept as distinct
//! types so one can never be passed where another is expected:
//!
//! - [`RawArgs`]: values as the caller supplied them.
//! - [`AddressedArgs`]: every value replaced by its [`ValueAddress`]. This
//!   is the form that participates in call identity.
//! - [`MaterializedArgs`]: every address resolved back to a value, ready to
//!   hand to a function body.
//!
//! All three keep their entries sorted by argument name, so insertion order
//! never affects equality or serialized bytes.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::ValueAddress;
use crate::error::TypeError;
use crate::value::Value;

/// Maximum length of an argument name.
pub const MAX_ARGUMENT_NAME_LEN: usize = 128;

/// Argument names must be identifiers: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_argument_name(name: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidArgumentName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name cannot be empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(invalid("name must start with a letter or underscore"))
        }
        _ => {}
    }
    if name.len() > MAX_ARGUMENT_NAME_LEN {
        return Err(invalid("name is too long"));
    }
    if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(invalid(&format!("character '{c}' is not allowed")));
    }
    Ok(())
}

/// A nested snapshot carried inside a [`Value`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Snapshot {
    Raw(RawArgs),
    Addressed(AddressedArgs),
    Materialized(MaterializedArgs),
}

impl Snapshot {
    pub fn len(&self) -> usize {
        match self {
            Self::Raw(a) => a.len(),
            Self::Addressed(a) => a.len(),
            Self::Materialized(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn descriptor(&self) -> String {
        let flavor = match self {
            Self::Raw(_) => "raw",
            Self::Addressed(_) => "addressed",
            Self::Materialized(_) => "materialized",
        };
        format!("{flavor}_args_len_{}", self.len())
    }
}

// ---------------------------------------------------------------------------
// RawArgs
// ---------------------------------------------------------------------------

/// Arguments exactly as the caller supplied them.
///
/// Values may embed nested snapshots of any flavor inside lists and maps,
/// but a raw snapshot is never accepted as the direct value of an argument.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Value>",
    into = "BTreeMap<String, Value>"
)]
pub struct RawArgs(BTreeMap<String, Value>);

impl RawArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an argument, returning the previous value under that name.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, TypeError> {
        let name = name.into();
        let value = value.into();
        validate_argument_name(&name)?;
        if matches!(value, Value::Args(Snapshot::Raw(_))) {
            return Err(TypeError::NestedRawArgs { key: name });
        }
        Ok(self.0.insert(name, value))
    }

    /// Builder form of [`RawArgs::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<Self, TypeError> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.values()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl TryFrom<BTreeMap<String, Value>> for RawArgs {
    type Error = TypeError;

    fn try_from(entries: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        let mut args = Self::new();
        for (name, value) in entries {
            args.insert(name, value)?;
        }
        Ok(args)
    }
}

impl From<RawArgs> for BTreeMap<String, Value> {
    fn from(args: RawArgs) -> Self {
        args.0
    }
}

impl<'a> IntoIterator for &'a RawArgs {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// AddressedArgs
// ---------------------------------------------------------------------------

/// Arguments with every value replaced by its content address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, ValueAddress>",
    into = "BTreeMap<String, ValueAddress>"
)]
pub struct AddressedArgs(BTreeMap<String, ValueAddress>);

impl AddressedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        address: ValueAddress,
    ) -> Result<Option<ValueAddress>, TypeError> {
        let name = name.into();
        validate_argument_name(&name)?;
        Ok(self.0.insert(name, address))
    }

    pub fn get(&self, name: &str) -> Option<&ValueAddress> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ValueAddress> {
        self.0.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &ValueAddress> {
        self.0.values()
    }

    /// View as a raw snapshot whose values are addresses.
    ///
    /// Packing the result yields `self` again.
    pub fn to_raw(&self) -> RawArgs {
        RawArgs(
            self.0
                .iter()
                .map(|(name, address)| (name.clone(), Value::Address(address.clone())))
                .collect(),
        )
    }
}

impl TryFrom<BTreeMap<String, ValueAddress>> for AddressedArgs {
    type Error = TypeError;

    fn try_from(entries: BTreeMap<String, ValueAddress>) -> Result<Self, Self::Error> {
        for name in entries.keys() {
            validate_argument_name(name)?;
        }
        Ok(Self(entries))
    }
}

impl From<AddressedArgs> for BTreeMap<String, ValueAddress> {
    fn from(args: AddressedArgs) -> Self {
        args.0
    }
}

// ---------------------------------------------------------------------------
// MaterializedArgs
// ---------------------------------------------------------------------------

/// Arguments with every address resolved to the value it names.
///
/// No entry is a bare [`ValueAddress`] and no entry is a raw snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Value>",
    into = "BTreeMap<String, Value>"
)]
pub struct MaterializedArgs(BTreeMap<String, Value>);

impl MaterializedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, TypeError> {
        let name = name.into();
        let value = value.into();
        validate_argument_name(&name)?;
        match value {
            Value::Address(_) => Err(TypeError::UnresolvedAddress { key: name }),
            Value::Args(Snapshot::Raw(_)) => Err(TypeError::NestedRawArgs { key: name }),
            value => Ok(self.0.insert(name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<Self, TypeError> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Fetch an argument or fail with [`TypeError::MissingArgument`].
    pub fn require(&self, name: &str) -> Result<&Value, TypeError> {
        self.0.get(name).ok_or_else(|| TypeError::MissingArgument {
            name: name.to_string(),
        })
    }

    /// Fetch an integer argument.
    pub fn int(&self, name: &str) -> Result<i64, TypeError> {
        let value = self.require(name)?;
        value.as_int().ok_or_else(|| TypeError::ArgumentType {
            name: name.to_string(),
            expected: "int",
            actual: value.type_name().to_string(),
        })
    }

    /// Fetch a string argument.
    pub fn str(&self, name: &str) -> Result<&str, TypeError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| TypeError::ArgumentType {
            name: name.to_string(),
            expected: "str",
            actual: value.type_name().to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.values()
    }

    /// The same entries as a raw snapshot.
    pub fn to_raw(&self) -> RawArgs {
        RawArgs(self.0.clone())
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl TryFrom<BTreeMap<String, Value>> for MaterializedArgs {
    type Error = TypeError;

    fn try_from(entries: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        let mut args = Self::new();
        for (name, value) in entries {
            args.insert(name, value)?;
        }
        Ok(args)
    }
}

impl From<MaterializedArgs> for BTreeMap<String, Value> {
    fn from(args: MaterializedArgs) -> Self {
        args.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use proptest::prelude::*;

    fn address(byte: u8) -> ValueAddress {
        ValueAddress::new(ContentHash::from_hash([byte; 32]), "int").unwrap()
    }

    // ---- RawArgs ----

    #[test]
    fn raw_args_rejects_direct_raw_snapshot() {
        let inner = RawArgs::new().with("x", 1i64).unwrap();
        let err = RawArgs::new().with("nested", inner).unwrap_err();
        assert_eq!(
            err,
            TypeError::NestedRawArgs {
                key: "nested".to_string()
            }
        );
    }

    #[test]
    fn raw_args_accepts_raw_snapshot_inside_list() {
        let inner = RawArgs::new().with("x", 1i64).unwrap();
        let args = RawArgs::new()
            .with("items", Value::List(vec![Value::from(inner)]))
            .unwrap();
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn raw_args_accepts_other_snapshot_flavors() {
        let mut addressed = AddressedArgs::new();
        addressed.insert("a", address(1)).unwrap();
        let materialized = MaterializedArgs::new().with("b", 2i64).unwrap();

        let args = RawArgs::new()
            .with("addressed", addressed)
            .unwrap()
            .with("materialized", materialized)
            .unwrap();
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn argument_names_are_validated() {
        assert!(RawArgs::new().with("", 1i64).is_err());
        assert!(RawArgs::new().with("1abc", 1i64).is_err());
        assert!(RawArgs::new().with("has space", 1i64).is_err());
        assert!(RawArgs::new().with("_ok_name2", 1i64).is_ok());
    }

    #[test]
    fn deserialize_revalidates() {
        let json = r#"{"nested": {"Args": {"Raw": {"x": {"Int": 1}}}}}"#;
        assert!(serde_json::from_str::<RawArgs>(json).is_err());
    }

    #[test]
    fn iteration_is_sorted_by_name() {
        let args = RawArgs::new()
            .with("zeta", 1i64)
            .unwrap()
            .with("alpha", 2i64)
            .unwrap();
        let names: Vec<_> = args.names().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    // ---- AddressedArgs ----

    #[test]
    fn addressed_to_raw_holds_addresses() {
        let mut addressed = AddressedArgs::new();
        addressed.insert("n", address(4)).unwrap();
        let raw = addressed.to_raw();
        assert_eq!(raw.get("n"), Some(&Value::Address(address(4))));
    }

    // ---- MaterializedArgs ----

    #[test]
    fn materialized_rejects_addresses() {
        let err = MaterializedArgs::new().with("n", address(1)).unwrap_err();
        assert_eq!(
            err,
            TypeError::UnresolvedAddress {
                key: "n".to_string()
            }
        );
    }

    #[test]
    fn materialized_typed_accessors() {
        let args = MaterializedArgs::new()
            .with("n", 5i64)
            .unwrap()
            .with("label", "five")
            .unwrap();
        assert_eq!(args.int("n").unwrap(), 5);
        assert_eq!(args.str("label").unwrap(), "five");
        assert!(matches!(
            args.int("label"),
            Err(TypeError::ArgumentType { .. })
        ));
        assert!(matches!(
            args.int("missing"),
            Err(TypeError::MissingArgument { .. })
        ));
    }

    #[test]
    fn clone_is_independent() {
        let original = MaterializedArgs::new().with("n", 1i64).unwrap();
        let mut copy = original.clone();
        copy.insert("n", 2i64).unwrap();
        assert_eq!(original.int("n").unwrap(), 1);
        assert_eq!(copy.int("n").unwrap(), 2);
    }

    // ---- property tests ----

    proptest! {
        #[test]
        fn insertion_order_does_not_change_encoding(
            entries in proptest::collection::btree_map("[a-z][a-z0-9_]{0,8}", any::<i64>(), 0..12)
        ) {
            let mut forward = RawArgs::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), *v).unwrap();
            }
            let mut backward = RawArgs::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), *v).unwrap();
            }
            prop_assert_eq!(&forward, &backward);
            prop_assert_eq!(
                serde_json::to_string(&forward).unwrap(),
                serde_json::to_string(&backward).unwrap()
            );
        }
    }
}
