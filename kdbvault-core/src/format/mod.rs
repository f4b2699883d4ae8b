//! On-disk format constants and codecs.
//!
//! A database file is a fixed 124-byte header followed by the encrypted
//! record stream: all groups, then all entries, each encoded as a
//! sequence of type-length-value fields closed by a terminator field.
//! Everything on the wire is little-endian; text is UTF-8 with a trailing
//! NUL included in the field size.

pub mod fields;
pub mod header;
pub mod timefield;

pub use fields::{FieldReader, FieldWriter};
pub use header::DbHeader;

/// First signature word of every database file.
pub const SIGNATURE_1: u32 = 0x9AA2_D903;

/// Second signature word of every database file.
pub const SIGNATURE_2: u32 = 0xB54B_FB65;

/// Current stream version.
pub const VERSION: u32 = 0x0003_0003;

/// Mask for the version bits that must match for a file to be readable.
pub const VERSION_CRITICAL_MASK: u32 = 0xFFFF_FF00;

/// Header flag: contents hashed with SHA-256.
pub const FLAG_SHA2: u32 = 1;

/// Header flag: payload encrypted with AES-256 (Rijndael).
pub const FLAG_RIJNDAEL: u32 = 2;

/// Header flag: payload encrypted with Twofish-256.
pub const FLAG_TWOFISH: u32 = 8;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 124;

/// Block size of both supported payload ciphers.
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Upper bound on the decrypted payload size (`2^31 - 202`); anything
/// larger indicates a garbage decryption.
pub const MAX_PAYLOAD_SIZE: usize = 2_147_483_446;

/// Terminator field closing every group and entry record.
pub const FIELD_TERMINATOR: u16 = 0xFFFF;

// Group record field types.

/// Group id (u32).
pub const GROUP_FIELD_ID: u16 = 0x0001;
/// Group name (UTF-8, NUL-terminated).
pub const GROUP_FIELD_NAME: u16 = 0x0002;
/// Creation time (packed 5 bytes).
pub const GROUP_FIELD_CREATION: u16 = 0x0003;
/// Last modification time (packed 5 bytes).
pub const GROUP_FIELD_LAST_MOD: u16 = 0x0004;
/// Last access time (packed 5 bytes).
pub const GROUP_FIELD_LAST_ACCESS: u16 = 0x0005;
/// Expiry time (packed 5 bytes).
pub const GROUP_FIELD_EXPIRE: u16 = 0x0006;
/// Icon id (u32).
pub const GROUP_FIELD_IMAGE_ID: u16 = 0x0007;
/// Tree level (u16).
pub const GROUP_FIELD_LEVEL: u16 = 0x0008;
/// Opaque flags (u32).
pub const GROUP_FIELD_FLAGS: u16 = 0x0009;

// Entry record field types.

/// Entry UUID (16 bytes).
pub const ENTRY_FIELD_UUID: u16 = 0x0001;
/// Owning group id (u32).
pub const ENTRY_FIELD_GROUP_ID: u16 = 0x0002;
/// Icon id (u32).
pub const ENTRY_FIELD_IMAGE_ID: u16 = 0x0003;
/// Title (UTF-8, NUL-terminated).
pub const ENTRY_FIELD_TITLE: u16 = 0x0004;
/// URL (UTF-8, NUL-terminated).
pub const ENTRY_FIELD_URL: u16 = 0x0005;
/// User name (UTF-8, NUL-terminated).
pub const ENTRY_FIELD_USER_NAME: u16 = 0x0006;
/// Password (UTF-8, NUL-terminated).
pub const ENTRY_FIELD_PASSWORD: u16 = 0x0007;
/// Notes (UTF-8, NUL-terminated).
pub const ENTRY_FIELD_NOTES: u16 = 0x0008;
/// Creation time (packed 5 bytes).
pub const ENTRY_FIELD_CREATION: u16 = 0x0009;
/// Last modification time (packed 5 bytes).
pub const ENTRY_FIELD_LAST_MOD: u16 = 0x000A;
/// Last access time (packed 5 bytes).
pub const ENTRY_FIELD_LAST_ACCESS: u16 = 0x000B;
/// Expiry time (packed 5 bytes).
pub const ENTRY_FIELD_EXPIRE: u16 = 0x000C;
/// Binary attachment description (UTF-8, NUL-terminated).
pub const ENTRY_FIELD_BINARY_DESC: u16 = 0x000D;
/// Binary attachment bytes (raw, may be empty).
pub const ENTRY_FIELD_BINARY: u16 = 0x000E;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_matches_layout() {
        // sig1 + sig2 + flags + version + seed(16) + iv(16)
        // + counts(8) + hash(32) + seed2(32) + rounds(4)
        assert_eq!(HEADER_SIZE, 4 + 4 + 4 + 4 + 16 + 16 + 4 + 4 + 32 + 32 + 4);
    }

    #[test]
    fn test_signature_constants() {
        assert_eq!(SIGNATURE_1, 0x9AA2_D903);
        assert_eq!(SIGNATURE_2, 0xB54B_FB65);
        assert_eq!(VERSION & VERSION_CRITICAL_MASK, 0x0003_0000);
    }
}
