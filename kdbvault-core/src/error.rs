//! Error types for database file and crypto operations.
//!
//! Every failure surfaced by the engine maps to exactly one [`DbError`]
//! kind; no other error type crosses the public API. Load and save roll
//! back any partial state before returning one of these.

use thiserror::Error;

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised by database file and crypto operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// A required input was empty or out of its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// An allocation was refused.
    #[error("out of memory")]
    NoMem,

    /// The database file could not be opened for reading.
    #[error("cannot open database file for reading: {0}")]
    NoFileAccessRead(#[source] std::io::Error),

    /// The key file could not be opened for reading, or it already exists
    /// and overwriting was not requested.
    #[error("cannot access key file: {0}")]
    NoFileAccessReadKey(String),

    /// The target file could not be opened for writing.
    #[error("cannot open file for writing: {0}")]
    NoFileAccessWrite(#[source] std::io::Error),

    /// A read returned fewer bytes than required.
    #[error("file read failed: {0}")]
    FileErrorRead(#[source] std::io::Error),

    /// A write stored fewer bytes than required.
    #[error("file write failed: {0}")]
    FileErrorWrite(#[source] std::io::Error),

    /// The file is smaller than the header, or the header is malformed.
    #[error("invalid file header")]
    InvalidFileHeader,

    /// The signature magic does not match.
    #[error("invalid file signature")]
    InvalidFileSignature,

    /// The ciphertext length is not a multiple of the cipher block size.
    #[error("invalid file size")]
    InvalidFileSize,

    /// The record stream overran or underran the payload bounds.
    #[error("invalid file structure")]
    InvalidFileStructure,

    /// The decrypted contents do not match the stored hash; with
    /// overwhelming probability the key is wrong.
    #[error("invalid key or corrupted database")]
    InvalidKey,

    /// The random source failed to produce the requested bytes.
    #[error("random source failure")]
    InvalidRandomSource,

    /// A cipher self-test or initialization failed.
    #[error("cipher error")]
    CryptError,

    /// Reserved catch-all; never returned when a more specific kind applies.
    #[error("unknown error")]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", DbError::InvalidParam("passphrase")),
            "invalid parameter: passphrase"
        );
        assert_eq!(format!("{}", DbError::InvalidKey), "invalid key or corrupted database");
        assert_eq!(format!("{}", DbError::InvalidFileSignature), "invalid file signature");
    }

    #[test]
    fn test_io_error_source_preserved() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = DbError::NoFileAccessRead(io);
        assert!(err.source().is_some());
    }
}
