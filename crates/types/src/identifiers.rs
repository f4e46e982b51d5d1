//! Domain-specific identifier types.

use crate::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validator address (20 bytes, derived from the public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Size of an address in bytes.
    pub const BYTES: usize = 20;

    /// Zero address.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Derive an address from a public key.
    ///
    /// The address is the trailing 20 bytes of the Blake3 hash of the
    /// public key bytes. Deterministic across nodes, so validator sets
    /// sorted by address agree everywhere.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let hash = blake3::hash(public_key.as_bytes());
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&hash.as_bytes()[12..32]);
        Self(arr)
    }

    /// Create an address from raw bytes.
    ///
    /// # Panics
    ///
    /// Panics if bytes length is not exactly 20.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), 20, "Address must be exactly 20 bytes");
        let mut arr = [0u8; 20];
        arr.copy_from_slice(bytes);
        Self(arr)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert address to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}
