//! Symmetric encryption envelope for the database payload.
//!
//! The record stream is encrypted in CBC mode with PKCS#7 padding using
//! either AES-256 or Twofish-256, and authenticated (against tampering
//! and wrong keys) by the SHA-256 contents hash stored in the header.

use aes::Aes256;
use cipher::block_padding::{NoPadding, Pkcs7};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use twofish::Twofish;
use zeroize::Zeroize;

use crate::error::{DbError, DbResult};
use crate::format::CIPHER_BLOCK_SIZE;
use crate::types::CipherAlgorithm;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type TwofishCbcEnc = cbc::Encryptor<Twofish>;
type TwofishCbcDec = cbc::Decryptor<Twofish>;

/// Computes the SHA-256 contents hash of a cleartext payload.
#[must_use]
pub fn contents_hash(payload: &[u8]) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(payload));
    hash
}

/// CBC-encrypts `plaintext` with PKCS#7 padding.
///
/// # Errors
///
/// Returns [`DbError::CryptError`] if the cipher cannot be initialized.
pub fn encrypt_payload(
    algorithm: CipherAlgorithm,
    key: &[u8; 32],
    iv: &[u8; 16],
    plaintext: &[u8],
) -> DbResult<Vec<u8>> {
    let msg_len = plaintext.len();
    let mut buf = vec![0u8; msg_len + CIPHER_BLOCK_SIZE];
    buf[..msg_len].copy_from_slice(plaintext);

    let ciphertext_len = match algorithm {
        CipherAlgorithm::Aes => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| DbError::CryptError)?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, msg_len)
            .map_err(|_| DbError::CryptError)?
            .len(),
        CipherAlgorithm::Twofish => TwofishCbcEnc::new_from_slices(key, iv)
            .map_err(|_| DbError::CryptError)?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, msg_len)
            .map_err(|_| DbError::CryptError)?
            .len(),
    };

    buf.truncate(ciphertext_len);
    Ok(buf)
}

/// CBC-decrypts `ciphertext` and strips the PKCS#7 padding.
///
/// # Errors
///
/// - [`DbError::CryptError`] if the cipher cannot be initialized.
/// - [`DbError::InvalidKey`] if the padding is malformed, which with a
///   wrong key is the overwhelmingly likely outcome.
pub fn decrypt_payload(
    algorithm: CipherAlgorithm,
    key: &[u8; 32],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> DbResult<Vec<u8>> {
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }

    let mut buf = ciphertext.to_vec();
    let plaintext_len = {
        let plaintext = match algorithm {
            CipherAlgorithm::Aes => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| DbError::CryptError)?
                .decrypt_padded_mut::<Pkcs7>(&mut buf)
                .map_err(|_| DbError::InvalidKey)?,
            CipherAlgorithm::Twofish => TwofishCbcDec::new_from_slices(key, iv)
                .map_err(|_| DbError::CryptError)?
                .decrypt_padded_mut::<Pkcs7>(&mut buf)
                .map_err(|_| DbError::InvalidKey)?,
        };
        plaintext.len()
    };

    buf.truncate(plaintext_len);
    Ok(buf)
}

/// Best-effort CBC decryption for repair mode.
///
/// Decrypts every block without padding validation, then strips a PKCS#7
/// tail only if one happens to be well-formed. Never fails on garbage
/// padding, so damaged files can still be walked for salvageable records.
///
/// # Errors
///
/// Returns [`DbError::CryptError`] if the cipher cannot be initialized or
/// the ciphertext is not block-aligned.
pub fn decrypt_payload_repair(
    algorithm: CipherAlgorithm,
    key: &[u8; 32],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> DbResult<Vec<u8>> {
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }

    let mut buf = ciphertext.to_vec();
    let decrypt_ok = match algorithm {
        CipherAlgorithm::Aes => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| DbError::CryptError)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .is_ok(),
        CipherAlgorithm::Twofish => TwofishCbcDec::new_from_slices(key, iv)
            .map_err(|_| DbError::CryptError)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .is_ok(),
    };
    if !decrypt_ok {
        buf.zeroize();
        return Err(DbError::CryptError);
    }

    if let Some(&pad) = buf.last() {
        let pad = pad as usize;
        if (1..=CIPHER_BLOCK_SIZE).contains(&pad)
            && pad <= buf.len()
            && buf[buf.len() - pad..].iter().all(|&b| b as usize == pad)
        {
            buf.truncate(buf.len() - pad);
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];
    const IV: [u8; 16] = [0x17; 16];

    #[test]
    fn test_aes_roundtrip() {
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let ciphertext = encrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, plaintext).unwrap();
        assert_eq!(ciphertext.len() % CIPHER_BLOCK_SIZE, 0);
        assert!(ciphertext.len() > plaintext.len());

        let decrypted = decrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_twofish_roundtrip() {
        let plaintext = vec![0xA5u8; 333];
        let ciphertext =
            encrypt_payload(CipherAlgorithm::Twofish, &KEY, &IV, &plaintext).unwrap();
        let decrypted =
            decrypt_payload(CipherAlgorithm::Twofish, &KEY, &IV, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphers_differ() {
        let plaintext = vec![0u8; 64];
        let aes = encrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, &plaintext).unwrap();
        let twofish = encrypt_payload(CipherAlgorithm::Twofish, &KEY, &IV, &plaintext).unwrap();
        assert_ne!(aes, twofish);
    }

    #[test]
    fn test_wrong_key_fails_unpad_or_garbles() {
        let plaintext = b"sixteen byte msg";
        let ciphertext = encrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, plaintext).unwrap();

        let mut wrong = KEY;
        wrong[0] ^= 1;
        match decrypt_payload(CipherAlgorithm::Aes, &wrong, &IV, &ciphertext) {
            Err(DbError::InvalidKey) => {}
            Ok(garbage) => assert_ne!(garbage, plaintext),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_block_aligned_exact_padding() {
        // A 16-byte message gains a full padding block.
        let plaintext = [0x31u8; 16];
        let ciphertext = encrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, &plaintext).unwrap();
        assert_eq!(ciphertext.len(), 32);

        let decrypted = decrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_payload() {
        let ciphertext = encrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, &[]).unwrap();
        assert_eq!(ciphertext.len(), CIPHER_BLOCK_SIZE);
        let decrypted = decrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, &ciphertext).unwrap();
        assert!(decrypted.is_empty());

        assert!(decrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_repair_decrypt_recovers_valid_payload() {
        let plaintext = b"repairable content here";
        let ciphertext = encrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, plaintext).unwrap();

        let recovered =
            decrypt_payload_repair(CipherAlgorithm::Aes, &KEY, &IV, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_repair_decrypt_tolerates_wrong_key() {
        let plaintext = b"some content";
        let ciphertext = encrypt_payload(CipherAlgorithm::Aes, &KEY, &IV, plaintext).unwrap();

        let mut wrong = KEY;
        wrong[7] ^= 0x80;
        // Garbage out, but no padding failure.
        let recovered =
            decrypt_payload_repair(CipherAlgorithm::Aes, &wrong, &IV, &ciphertext).unwrap();
        assert!(!recovered.is_empty());
    }

    #[test]
    fn test_contents_hash_detects_flip() {
        let payload = vec![0x11u8; 100];
        let hash = contents_hash(&payload);

        let mut flipped = payload;
        flipped[50] ^= 0x01;
        assert_ne!(hash, contents_hash(&flipped));
    }
}
