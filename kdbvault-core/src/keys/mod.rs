//! Master-key derivation.
//!
//! Two stages turn user credentials into the file encryption key:
//!
//! 1. [`composite`] composes a 32-byte raw master key from a passphrase,
//!    a key file, or both.
//! 2. [`transform`] stretches the raw key with iterated AES-ECB rounds
//!    and binds in the per-save header seeds.

pub mod composite;
pub mod transform;

pub use composite::{generate_key_file, KeySource, DEFAULT_KEY_FILE_NAME};
pub use transform::{derive_final_key, transform_master_key, STD_KEY_ENC_ROUNDS};

use zeroize::{Zeroize, ZeroizeOnDrop};

/// The 32-byte raw master key.
///
/// Zeroized on drop; never logged or serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Creates a master key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// An all-zero key slot, the state before any key has been set.
    #[must_use]
    pub const fn empty() -> Self {
        Self([0u8; 32])
    }

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Overwrites the key slot in place.
    pub fn set_bytes(&mut self, bytes: &[u8; 32]) {
        self.0.copy_from_slice(bytes);
    }

    /// Zeroes the key slot in place.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_roundtrip() {
        let key = MasterKey::from_bytes([0x42; 32]);
        assert_eq!(key.as_bytes(), &[0x42; 32]);
    }

    #[test]
    fn test_master_key_clear() {
        let mut key = MasterKey::from_bytes([0x42; 32]);
        key.clear();
        assert_eq!(key.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_debug_redacted() {
        let key = MasterKey::from_bytes([0x42; 32]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("66"));
    }
}
