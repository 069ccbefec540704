use cachet_types::{ContentHash, TypeError, ValueAddress};

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, followed by the value's type descriptor. A string and a
/// byte array with identical encodings therefore never share an address.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for values held in the content store.
    pub const VALUE: Self = Self {
        domain: "cachet-value-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        self.hash_tagged("", data)
    }

    /// Hash bytes under both the domain and a type descriptor.
    pub fn hash_tagged(&self, descriptor: &str, data: &[u8]) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(descriptor.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ContentHash::from_hash(*hasher.finalize().as_bytes())
    }

    /// Canonical bytes of a serializable value.
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HasherError> {
        bincode::serialize(value).map_err(|e| HasherError::Serialization(e.to_string()))
    }

    /// Address of already-encoded bytes under `descriptor`.
    pub fn address(&self, descriptor: &str, data: &[u8]) -> Result<ValueAddress, HasherError> {
        Ok(ValueAddress::new(
            self.hash_tagged(descriptor, data),
            descriptor,
        )?)
    }

    /// Whether `data` hashes to the given address.
    pub fn verify(&self, data: &[u8], expected: &ValueAddress) -> bool {
        self.hash_tagged(expected.descriptor(), data) == *expected.hash()
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Type(#[from] TypeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHasher::VALUE.hash(data), ContentHasher::VALUE.hash(data));
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let custom = ContentHasher::new("cachet-test-v1");
        assert_ne!(ContentHasher::VALUE.hash(b"x"), custom.hash(b"x"));
    }

    #[test]
    fn descriptor_participates_in_hash() {
        let a = ContentHasher::VALUE.hash_tagged("str_len_1", b"x");
        let b = ContentHasher::VALUE.hash_tagged("bytes_len_1", b"x");
        assert_ne!(a, b);
    }

    #[test]
    fn address_verifies_its_own_bytes() {
        let bytes = ContentHasher::encode(&42i64).unwrap();
        let addr = ContentHasher::VALUE.address("int", &bytes).unwrap();
        assert!(ContentHasher::VALUE.verify(&bytes, &addr));
        assert!(!ContentHasher::VALUE.verify(b"tampered", &addr));
    }

    #[test]
    fn address_rejects_bad_descriptor() {
        assert!(matches!(
            ContentHasher::VALUE.address("Bad/Descriptor", b"x"),
            Err(HasherError::Type(_))
        ));
    }

    #[test]
    fn encoding_is_stable() {
        let a = ContentHasher::encode(&("n", 3i64)).unwrap();
        let b = ContentHasher::encode(&("n", 3i64)).unwrap();
        assert_eq!(a, b);
    }
}
