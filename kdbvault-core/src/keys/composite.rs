//! Raw master-key composition from passphrase and key-file inputs.
//!
//! A key file holds either exactly 32 raw bytes, exactly 64 ASCII-hex
//! characters encoding 32 bytes, or arbitrary content that is hashed with
//! SHA-256 (streamed in 2048-byte chunks). When both a passphrase and a
//! key file are supplied the two 32-byte halves are hashed together.
//! Intermediate buffers are wiped before returning.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{DbError, DbResult};
use crate::random::RandomSource;

use super::MasterKey;

/// File name appended when a key-file path points at a directory.
pub const DEFAULT_KEY_FILE_NAME: &str = "pwsafe.key";

const KEY_FILE_CHUNK: usize = 2048;

/// Where the raw master key comes from.
#[derive(Debug, Clone, Copy)]
pub enum KeySource<'a> {
    /// Passphrase only: `key = SHA256(utf8(passphrase))`.
    Passphrase(&'a str),
    /// Key file only, by the key-file rules.
    KeyFile(&'a Path),
    /// Passphrase and key file:
    /// `key = SHA256(SHA256(passphrase) || filekey)`.
    Composite {
        /// The passphrase half.
        passphrase: &'a str,
        /// The key-file half.
        key_file: &'a Path,
    },
}

/// Composes the raw master key from the given source.
///
/// # Errors
///
/// - [`DbError::InvalidKey`] for an empty passphrase.
/// - [`DbError::NoFileAccessReadKey`] if the key file cannot be opened.
/// - [`DbError::FileErrorRead`] on a short read.
pub fn compose(source: &KeySource<'_>) -> DbResult<MasterKey> {
    match source {
        KeySource::Passphrase(passphrase) => hash_passphrase(passphrase),
        KeySource::KeyFile(path) => {
            let mut file_key = read_key_file(path)?;
            let key = MasterKey::from_bytes(*file_key);
            file_key.zeroize();
            Ok(key)
        }
        KeySource::Composite {
            passphrase,
            key_file,
        } => {
            let pw_key = hash_passphrase(passphrase)?;
            let file_key = read_key_file(key_file)?;
            Ok(combine(&pw_key, &file_key))
        }
    }
}

/// Generates a fresh 32-byte key, writes it to `path` as 64 ASCII-hex
/// characters, and returns the composed master key (hashed together with
/// `passphrase` if one is given).
///
/// # Errors
///
/// - [`DbError::NoFileAccessReadKey`] if the file exists and `overwrite`
///   is not set.
/// - [`DbError::NoFileAccessWrite`] / [`DbError::FileErrorWrite`] on
///   write failures.
/// - [`DbError::InvalidRandomSource`] if the source cannot produce bytes.
pub fn generate_key_file(
    path: &Path,
    passphrase: Option<&str>,
    overwrite: bool,
    rng: &mut dyn RandomSource,
) -> DbResult<MasterKey> {
    let path = resolve_key_path(path);

    if path.exists() && !overwrite {
        return Err(DbError::NoFileAccessReadKey(format!(
            "{} already exists and overwrite was not requested",
            path.display()
        )));
    }

    let mut random_key = Zeroizing::new([0u8; 32]);
    rng.fill_bytes(&mut *random_key)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .map_err(DbError::NoFileAccessWrite)?;
    let mut encoded = Zeroizing::new(hex::encode(*random_key));
    file.write_all(encoded.as_bytes())
        .map_err(DbError::FileErrorWrite)?;
    encoded.zeroize();

    match passphrase {
        Some(passphrase) => {
            let pw_key = hash_passphrase(passphrase)?;
            Ok(combine(&pw_key, &random_key))
        }
        None => Ok(MasterKey::from_bytes(*random_key)),
    }
}

/// `SHA256(pwkey || filekey)`.
fn combine(pw_key: &MasterKey, file_key: &[u8; 32]) -> MasterKey {
    let mut hasher = Sha256::new();
    hasher.update(pw_key.as_bytes());
    hasher.update(file_key);
    let digest = hasher.finalize();

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    let key = MasterKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

fn hash_passphrase(passphrase: &str) -> DbResult<MasterKey> {
    if passphrase.is_empty() {
        return Err(DbError::InvalidKey);
    }

    let digest = Sha256::digest(passphrase.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    let key = MasterKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

/// Reads a key file by the three-way rule: 32 raw bytes, 64 hex
/// characters, or SHA-256 of the whole content.
fn read_key_file(path: &Path) -> DbResult<Zeroizing<[u8; 32]>> {
    let path = resolve_key_path(path);
    let mut file = File::open(&path).map_err(|err| {
        DbError::NoFileAccessReadKey(format!("{}: {err}", path.display()))
    })?;
    let file_size = file
        .metadata()
        .map_err(DbError::FileErrorRead)?
        .len();

    if file_size == 32 {
        let mut key = Zeroizing::new([0u8; 32]);
        file.read_exact(&mut *key)
            .map_err(DbError::FileErrorRead)?;
        return Ok(key);
    }

    if file_size == 64 {
        let mut encoded = Zeroizing::new([0u8; 64]);
        file.read_exact(&mut *encoded)
            .map_err(DbError::FileErrorRead)?;

        let mut key = Zeroizing::new([0u8; 32]);
        if hex::decode_to_slice(&*encoded, &mut *key).is_ok() {
            return Ok(key);
        }
        // Not valid hex after all: hash the 64 bytes like any other file.
        let digest = Sha256::digest(&*encoded);
        key.copy_from_slice(&digest);
        return Ok(key);
    }

    let mut hasher = Sha256::new();
    let mut chunk = Zeroizing::new([0u8; KEY_FILE_CHUNK]);
    loop {
        let read = file
            .read(&mut *chunk)
            .map_err(DbError::FileErrorRead)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&hasher.finalize());
    Ok(key)
}

/// Appends the default key file name when the path points at a directory
/// or ends in a path separator.
fn resolve_key_path(path: &Path) -> PathBuf {
    let ends_in_separator = path
        .to_str()
        .is_some_and(|s| s.ends_with('/') || s.ends_with('\\'));
    if path.is_dir() || ends_in_separator {
        path.join(DEFAULT_KEY_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}
