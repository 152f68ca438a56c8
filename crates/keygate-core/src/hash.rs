//! Pure synchronous hashing
//!
//! Hashing is deterministic and side-effect free, so it is not routed through
//! the effect system. This module is the single place that names the
//! algorithm; everything else calls [`hash`] or [`hasher`].
//!
//! Current algorithm: **SHA-256** (32-byte output)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// 32-byte digest, rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// The all-zero digest.
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash32::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash a single buffer.
pub fn hash(data: &[u8]) -> Hash32 {
    let mut h = hasher();
    h.update(data);
    h.finalize()
}

/// Start an incremental hash.
pub fn hasher() -> IncrementalHasher {
    IncrementalHasher(Sha256::new())
}

/// Incremental hasher for multi-part input.
pub struct IncrementalHasher(Sha256);

impl IncrementalHasher {
    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Consume the hasher and return the digest.
    pub fn finalize(self) -> Hash32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.finalize());
        Hash32(out)
    }
}
