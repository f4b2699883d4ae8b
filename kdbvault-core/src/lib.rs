//! Core engine for the kdbvault encrypted password database.
//!
//! A database is an in-memory, hierarchically grouped collection of secret
//! records, serialized to a single encrypted file: a fixed 124-byte header
//! followed by a type-length-value record stream, CBC-encrypted with
//! AES-256 or Twofish-256 and authenticated by a SHA-256 contents hash.
//!
//! # Security model
//!
//! - The master key is stretched with a tunable number of AES-ECB rounds
//!   before use, raising the cost of offline dictionary attacks.
//! - While resident in memory, entry passwords are XOR-obfuscated with a
//!   per-instance session stream cipher. This is a defense-in-depth
//!   mitigation against casual memory dumps, **not** cryptographic
//!   protection against an attacker with full memory read access.
//! - Buffers holding key or password material are zeroed before release.
//!
//! # Index stability
//!
//! Lookup results are plain array indices. They are valid only until the
//! next structural mutation (any add, delete, move, sort, merge, open or
//! reset); callers that need stable references should hold on to group ids
//! and entry UUIDs instead.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod db;
pub mod error;
pub mod format;
pub mod keys;
pub mod obfuscate;
pub mod random;
pub mod types;

pub use db::{PwDatabase, RepairInfo};
pub use error::{DbError, DbResult};
pub use keys::{KeySource, MasterKey};
pub use types::{CipherAlgorithm, PwEntry, PwGroup, PwTime, SortField};
