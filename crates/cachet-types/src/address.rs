use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::ContentHash;

/// Maximum length of a type descriptor.
pub const MAX_DESCRIPTOR_LEN: usize = 128;

/// The permanent identifier of a stored value.
///
/// An address pairs the content hash of the value's canonical bytes with a
/// short type descriptor such as `int`, `str_len_5` or `list_len_3`. The
/// descriptor is informational and doubles as a storage partition; identity
/// is the hash alone, so two addresses with the same hash compare equal.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "AddressRepr", into = "AddressRepr")]
pub struct ValueAddress {
    hash: ContentHash,
    descriptor: String,
}

#[derive(Serialize, Deserialize)]
struct AddressRepr {
    hash: ContentHash,
    descriptor: String,
}

impl TryFrom<AddressRepr> for ValueAddress {
    type Error = TypeError;

    fn try_from(repr: AddressRepr) -> Result<Self, Self::Error> {
        Self::new(repr.hash, repr.descriptor)
    }
}

impl From<ValueAddress> for AddressRepr {
    fn from(address: ValueAddress) -> Self {
        Self {
            hash: address.hash,
            descriptor: address.descriptor,
        }
    }
}

impl ValueAddress {
    pub fn new(hash: ContentHash, descriptor: impl Into<String>) -> Result<Self, TypeError> {
        let descriptor = descriptor.into();
        validate_descriptor(&descriptor)?;
        Ok(Self { hash, descriptor })
    }

    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn to_hex(&self) -> String {
        self.hash.to_hex()
    }

    /// `descriptor:abcd1234`, for logs and terminal output.
    pub fn short(&self) -> String {
        format!("{}:{}", self.descriptor, self.hash.short_hex())
    }
}

/// Check that a descriptor can be used verbatim as a storage key segment.
pub fn validate_descriptor(descriptor: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidDescriptor {
        descriptor: descriptor.to_string(),
        reason: reason.to_string(),
    };
    if descriptor.is_empty() {
        return Err(invalid("descriptor cannot be empty"));
    }
    if descriptor.len() > MAX_DESCRIPTOR_LEN {
        return Err(invalid("descriptor is too long"));
    }
    if let Some(c) = descriptor
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
    {
        return Err(invalid(&format!("character '{c}' is not allowed")));
    }
    Ok(())
}

impl PartialEq for ValueAddress {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for ValueAddress {}

impl Hash for ValueAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for ValueAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl fmt::Debug for ValueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueAddress({})", self.short())
    }
}

impl fmt::Display for ValueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.descriptor, self.hash)
    }
}

impl FromStr for ValueAddress {
    type Err = TypeError;

    /// Parse the `descriptor:hex` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descriptor, hex) = s.rsplit_once(':').ok_or_else(|| TypeError::InvalidDescriptor {
            descriptor: s.to_string(),
            reason: "expected 'descriptor:hash'".to_string(),
        })?;
        Self::new(ContentHash::from_hex(hex)?, descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(byte: u8, descriptor: &str) -> ValueAddress {
        ValueAddress::new(ContentHash::from_hash([byte; 32]), descriptor).unwrap()
    }

    #[test]
    fn equality_is_by_hash() {
        assert_eq!(address(1, "int"), address(1, "int"));
        assert_ne!(address(1, "int"), address(2, "int"));
    }

    #[test]
    fn display_parse_roundtrip() {
        let addr = address(9, "str_len_5");
        let parsed: ValueAddress = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(parsed.descriptor(), "str_len_5");
    }

    #[test]
    fn short_form_includes_descriptor() {
        let addr = address(0xff, "list_len_3");
        assert_eq!(addr.short(), "list_len_3:ffffffff");
    }

    #[test]
    fn rejects_bad_descriptors() {
        let hash = ContentHash::from_hash([0; 32]);
        assert!(ValueAddress::new(hash, "").is_err());
        assert!(ValueAddress::new(hash, "has/slash").is_err());
        assert!(ValueAddress::new(hash, "Upper").is_err());
        assert!(ValueAddress::new(hash, "x".repeat(MAX_DESCRIPTOR_LEN + 1)).is_err());
    }

    #[test]
    fn deserialize_validates_descriptor() {
        let addr = address(3, "int");
        let json = serde_json::to_string(&addr).unwrap();
        let parsed: ValueAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr);

        let bad = json.replace("\"int\"", "\"../etc\"");
        assert!(serde_json::from_str::<ValueAddress>(&bad).is_err());
    }
}
