//! In-memory secret obfuscation.
//!
//! Entry passwords at rest in RAM are XORed with an ARC4-style keystream
//! derived from a per-database session key. Applying the stream twice
//! restores the cleartext, so locking and unlocking are the same
//! operation. This hides passwords from casual memory inspection and
//! memory dumps; it is **not** cryptographic protection against an
//! attacker who can read the session key out of the same process.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::DbResult;
use crate::random::RandomSource;

/// Size of the per-database session key in bytes.
pub const SESSION_KEY_SIZE: usize = 32;

/// Per-database obfuscation cipher.
///
/// The key is created from the injected random source when the database
/// is instantiated and zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionCipher {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionCipher {
    /// Creates a cipher with a fresh random session key.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::DbError::InvalidRandomSource`] from the source.
    pub fn new(rng: &mut dyn RandomSource) -> DbResult<Self> {
        let mut key = [0u8; SESSION_KEY_SIZE];
        rng.fill_bytes(&mut key)?;
        Ok(Self { key })
    }

    /// Creates a cipher with a caller-provided key. Intended for tests
    /// that need a reproducible keystream.
    #[must_use]
    pub const fn from_key(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// XORs `data` with the session keystream in place.
    ///
    /// Applying twice is the identity, so the same call both locks and
    /// unlocks a buffer.
    pub fn apply(&self, data: &mut [u8]) {
        if data.is_empty() {
            return;
        }

        // ARC4 key schedule.
        let mut state = [0u8; 256];
        for (i, b) in state.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            {
                *b = i as u8;
            }
        }
        let mut j = 0u8;
        for i in 0..256 {
            j = j
                .wrapping_add(state[i])
                .wrapping_add(self.key[i % SESSION_KEY_SIZE]);
            state.swap(i, usize::from(j));
        }

        // Keystream generation, XORed directly onto the data.
        let mut i = 0u8;
        let mut j = 0u8;
        for byte in data.iter_mut() {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[usize::from(i)]);
            state.swap(usize::from(i), usize::from(j));
            let k = state[usize::from(state[usize::from(i)].wrapping_add(state[usize::from(j)]))];
            *byte ^= k;
        }

        state.zeroize();
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_twice_is_identity() {
        let cipher = SessionCipher::from_key([0x42; SESSION_KEY_SIZE]);
        let mut data = b"hunter2".to_vec();
        cipher.apply(&mut data);
        assert_ne!(data, b"hunter2");
        cipher.apply(&mut data);
        assert_eq!(data, b"hunter2");
    }

    #[test]
    fn test_keystream_depends_on_key()  {
        let a = SessionCipher::from_key([0x01; SESSION_KEY_SIZE]);
        let b = SessionCipher::from_key([0x02; SESSION_KEY_SIZE]);
        let mut da = b"same input".to_vec();
        let mut db = b"same input".to_vec();
        a.apply(&mut da);
        b.apply(&mut db);
        assert_ne!(da, db);
    }

    #[test]
    fn test_empty_buffer_is_noop() {
        let cipher = SessionCipher::from_key([0x42; SESSION_KEY_SIZE]);
        let mut data: Vec<u8> = Vec::new();
        cipher.apply(&mut data);
        assert!(data.is_empty());
    }

    #[test]
    fn test_length_preserved() {
        let cipher = SessionCipher::from_key([7; SESSION_KEY_SIZE]);
        let mut data = vec![0u8; 1000];
        cipher.apply(&mut data);
        assert_eq!(data.len(), 1000);
    }

    #[test]
    fn test_debug_redacted() {
        let cipher = SessionCipher::from_key([0x42; SESSION_KEY_SIZE]);
        assert!(format!("{cipher:?}").contains("REDACTED"));
    }
}
