//! Identity types for LINEAGE records

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Prefix carried by every invocation id.
pub const INVOCATION_ID_PREFIX: &str = "invocation-";

/// Number of random bytes behind an invocation id (hex-encoded to 32 chars).
pub const INVOCATION_ID_RANDOM_BYTES: usize = 16;

/// Content hash identifying one program version.
///
/// Produced by the closure resolver and treated as an opaque, stable string.
/// Two programs with identical closures share the same hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramHash(String);

impl ProgramHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 hex digest of a call's canonical parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputHash(String);

impl InputHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique, unguessable identifier of one invocation.
///
/// Textual form is `invocation-` followed by 32 lowercase hex characters
/// drawn from the thread-local CSPRNG.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(String);

impl InvocationId {
    /// Generate a fresh random invocation id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; INVOCATION_ID_RANDOM_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(format!("{}{}", INVOCATION_ID_PREFIX, hex::encode(bytes)))
    }

    /// Wrap an existing id (e.g. one read back from a store).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id has the shape produced by [`InvocationId::generate`].
    pub fn is_well_formed(&self) -> bool {
        match self.0.strip_prefix(INVOCATION_ID_PREFIX) {
            Some(token) => {
                token.len() == INVOCATION_ID_RANDOM_BYTES * 2
                    && token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            }
            None => false,
        }
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute SHA-256 of content, returning the hex-encoded digest.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    hex::encode(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_invocation_id_is_well_formed() {
        let id = InvocationId::generate();
        assert!(id.as_str().starts_with("invocation-"));
        assert_eq!(id.as_str().len(), "invocation-".len() + 32);
        assert!(id.is_well_formed());
    }

    #[test]
    fn test_generated_invocation_ids_differ() {
        let a = InvocationId::generate();
        let b = InvocationId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_invocation_id() {
        assert!(!InvocationId::from_string("invocation-xyz").is_well_formed());
        assert!(!InvocationId::from_string("abc").is_well_formed());
        assert!(!InvocationId::from_string(format!("invocation-{}", "A".repeat(32))).is_well_formed());
    }

    #[test]
    fn test_sha256_hex() {
        // echo -n "hello world" | sha256sum
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_hash_newtypes_serialize_transparently() {
        let hash = ProgramHash::new("abc123");
        assert_eq!(serde_json::to_string(&hash).unwrap(), "\"abc123\"");
        let id: InvocationId = serde_json::from_str("\"invocation-00\"").unwrap();
        assert_eq!(id.as_str(), "invocation-00");
    }
}
