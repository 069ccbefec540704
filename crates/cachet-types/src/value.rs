use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::ValueAddress;
use crate::args::{AddressedArgs, MaterializedArgs, RawArgs, Snapshot};
use crate::error::TypeError;

/// Deepest nesting of lists, maps and snapshots a storable value may have.
pub const MAX_VALUE_DEPTH: usize = 64;

/// A dynamically typed value that can be stored, addressed and passed as
/// a function argument.
///
/// Maps are ordered by key so every value has exactly one canonical
/// encoding. Values are owned trees and therefore acyclic; the depth limit
/// guards against pathological nesting instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A reference to a value held in the content store.
    Address(ValueAddress),
    /// A nested argument snapshot of any flavor.
    Args(Snapshot),
}

impl Value {
    /// Short type descriptor used in the value's address.
    pub fn descriptor(&self) -> String {
        match self {
            Self::Null => "none".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Int(_) => "int".to_string(),
            Self::Float(_) => "float".to_string(),
            Self::Str(s) => format!("str_len_{}", s.chars().count()),
            Self::Bytes(b) => format!("bytes_len_{}", b.len()),
            Self::List(items) => format!("list_len_{}", items.len()),
            Self::Map(entries) => format!("map_len_{}", entries.len()),
            Self::Address(_) => "address".to_string(),
            Self::Args(snapshot) => snapshot.descriptor(),
        }
    }

    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Address(_) => "address",
            Self::Args(Snapshot::Raw(_)) => "raw_args",
            Self::Args(Snapshot::Addressed(_)) => "addressed_args",
            Self::Args(Snapshot::Materialized(_)) => "materialized_args",
        }
    }

    /// Reject values nested deeper than [`MAX_VALUE_DEPTH`].
    pub fn check_depth(&self) -> Result<(), TypeError> {
        if self.fits_depth(MAX_VALUE_DEPTH) {
            Ok(())
        } else {
            Err(TypeError::NestingTooDeep {
                depth: MAX_VALUE_DEPTH + 1,
                limit: MAX_VALUE_DEPTH,
            })
        }
    }

    // Stops descending as soon as the budget is exhausted.
    fn fits_depth(&self, budget: usize) -> bool {
        if budget == 0 {
            return false;
        }
        match self {
            Self::List(items) => items.iter().all(|v| v.fits_depth(budget - 1)),
            Self::Map(entries) => entries.values().all(|v| v.fits_depth(budget - 1)),
            Self::Args(Snapshot::Raw(args)) => args.values().all(|v| v.fits_depth(budget - 1)),
            Self::Args(Snapshot::Materialized(args)) => {
                args.values().all(|v| v.fits_depth(budget - 1))
            }
            Self::Args(Snapshot::Addressed(_)) => budget >= 2,
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&ValueAddress> {
        match self {
            Self::Address(address) => Some(address),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

impl From<ValueAddress> for Value {
    fn from(v: ValueAddress) -> Self {
        Self::Address(v)
    }
}

impl From<RawArgs> for Value {
    fn from(v: RawArgs) -> Self {
        Self::Args(Snapshot::Raw(v))
    }
}

impl From<AddressedArgs> for Value {
    fn from(v: AddressedArgs) -> Self {
        Self::Args(Snapshot::Addressed(v))
    }
}

impl From<MaterializedArgs> for Value {
    fn from(v: MaterializedArgs) -> Self {
        Self::Args(Snapshot::Materialized(v))
    }
}
