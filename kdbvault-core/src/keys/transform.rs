//! Iterated key stretching and final-key derivation.
//!
//! The raw master key is encrypted round after round with AES-256-ECB
//! keyed by the per-save `master_seed_2`, then hashed once with SHA-256.
//! The round count is persisted per database so the cost of an offline
//! dictionary attack can be raised independently of the chosen payload
//! cipher. A fixed known-answer test validates the AES implementation on
//! every transform.

use aes::Aes256;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{DbError, DbResult};

/// Default key stretching round count for new databases.
pub const STD_KEY_ENC_ROUNDS: u32 = 6000;

/// FIPS-197 appendix C.3 vector: key `00..1f`, plaintext bytes
/// `(i << 4) | i`, expected ciphertext below.
const KAT_EXPECTED: [u8; 16] = [
    0x8e, 0xa2, 0xb7, 0xca, 0x51, 0x67, 0x45, 0xbf, 0xea, 0xfc, 0x49, 0x90, 0x4b, 0x49, 0x60,
    0x89,
];

/// Runs the embedded AES known-answer test.
///
/// # Errors
///
/// Returns [`DbError::CryptError`] if the computed ciphertext does not
/// match the reference vector.
pub fn aes_self_test() -> DbResult<()> {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        {
            *b = i as u8;
        }
    }
    let mut block = [0u8; 16];
    for (i, b) in block.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        {
            *b = ((i as u8) << 4) | (i as u8);
        }
    }

    let cipher = Aes256::new_from_slice(&key).map_err(|_| DbError::CryptError)?;
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));

    if block == KAT_EXPECTED {
        Ok(())
    } else {
        Err(DbError::CryptError)
    }
}

/// Stretches the raw master key.
///
/// Both 16-byte halves of the working buffer are AES-ECB encrypted with
/// `seed` as the key for `rounds` iterations, then the buffer is hashed
/// once with SHA-256.
///
/// # Errors
///
/// Returns [`DbError::CryptError`] if the cipher cannot be initialized or
/// the embedded known-answer test fails.
pub fn transform_master_key(
    raw_key: &[u8; 32],
    seed: &[u8; 32],
    rounds: u32,
) -> DbResult<Zeroizing<[u8; 32]>> {
    aes_self_test()?;

    let cipher = Aes256::new_from_slice(seed).map_err(|_| DbError::CryptError)?;

    let mut work = Zeroizing::new(*raw_key);
    for _ in 0..rounds {
        let (lo, hi) = work.split_at_mut(16);
        cipher.encrypt_block(GenericArray::from_mut_slice(lo));
        cipher.encrypt_block(GenericArray::from_mut_slice(hi));
    }

    let digest = Sha256::digest(&*work);
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Derives the file key: `SHA256(master_seed || transformed_key)`.
#[must_use]
pub fn derive_final_key(master_seed: &[u8; 16], transformed_key: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(master_seed);
    hasher.update(transformed_key);

    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&hasher.finalize());
    out
}
