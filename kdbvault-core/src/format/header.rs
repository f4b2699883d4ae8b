//! Database file header.

use crate::error::{DbError, DbResult};

use super::{
    FLAG_SHA2, HEADER_SIZE, SIGNATURE_1, SIGNATURE_2, VERSION, VERSION_CRITICAL_MASK,
};

/// The fixed header at the start of every database file.
///
/// # Binary Layout (124 bytes, little-endian)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     signature_1 (0x9AA2D903)
/// 4       4     signature_2 (0xB54BFB65)
/// 8       4     flags (SHA2 | RIJNDAEL or TWOFISH)
/// 12      4     version (0x00030003)
/// 16      16    master_seed
/// 32      16    iv
/// 48      4     group_count
/// 52      4     entry_count
/// 56      32    contents_hash (SHA-256 of the cleartext record stream)
/// 88      32    master_seed_2 (key stretching seed)
/// 120     4     key_enc_rounds
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbHeader {
    /// Hash and cipher selection bits.
    pub flags: u32,
    /// Stream version.
    pub version: u32,
    /// Per-save seed mixed into the final key.
    pub master_seed: [u8; 16],
    /// CBC initialization vector.
    pub iv: [u8; 16],
    /// Number of group records in the payload.
    pub group_count: u32,
    /// Number of entry records in the payload.
    pub entry_count: u32,
    /// SHA-256 of the cleartext payload.
    pub contents_hash: [u8; 32],
    /// Key stretching seed.
    pub master_seed_2: [u8; 32],
    /// Key stretching round count.
    pub key_enc_rounds: u32,
}

impl Default for DbHeader {
    fn default() -> Self {
        Self {
            flags: FLAG_SHA2,
            version: VERSION,
            master_seed: [0u8; 16],
            iv: [0u8; 16],
            group_count: 0,
            entry_count: 0,
            contents_hash: [0u8; 32],
            master_seed_2: [0u8; 32],
            key_enc_rounds: 0,
        }
    }
}

impl DbHeader {
    /// Encodes the header to its 124-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&SIGNATURE_1.to_le_bytes());
        buf[4..8].copy_from_slice(&SIGNATURE_2.to_le_bytes());
        buf[8..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.version.to_le_bytes());
        buf[16..32].copy_from_slice(&self.master_seed);
        buf[32..48].copy_from_slice(&self.iv);
        buf[48..52].copy_from_slice(&self.group_count.to_le_bytes());
        buf[52..56].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[56..88].copy_from_slice(&self.contents_hash);
        buf[88..120].copy_from_slice(&self.master_seed_2);
        buf[120..124].copy_from_slice(&self.key_enc_rounds.to_le_bytes());

        buf
    }

    /// Decodes and validates a header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// - [`DbError::InvalidFileHeader`] if fewer than 124 bytes are
    ///   available or the version is not the current stream version.
    /// - [`DbError::InvalidFileSignature`] on signature mismatch.
    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(DbError::InvalidFileHeader);
        }

        let signature_1 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let signature_2 = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if signature_1 != SIGNATURE_1 || signature_2 != SIGNATURE_2 {
            return Err(DbError::InvalidFileSignature);
        }

        let version = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        if version & VERSION_CRITICAL_MASK != VERSION & VERSION_CRITICAL_MASK {
            // Legacy streams are a separate deliverable; only the current
            // major/minor is readable here.
            return Err(DbError::InvalidFileHeader);
        }

        let flags = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        let mut master_seed = [0u8; 16];
        master_seed.copy_from_slice(&bytes[16..32]);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&bytes[32..48]);

        let group_count = u32::from_le_bytes([bytes[48], bytes[49], bytes[50], bytes[51]]);
        let entry_count = u32::from_le_bytes([bytes[52], bytes[53], bytes[54], bytes[55]]);

        let mut contents_hash = [0u8; 32];
        contents_hash.copy_from_slice(&bytes[56..88]);
        let mut master_seed_2 = [0u8; 32];
        master_seed_2.copy_from_slice(&bytes[88..120]);

        let key_enc_rounds =
            u32::from_le_bytes([bytes[120], bytes[121], bytes[122], bytes[123]]);

        Ok(Self {
            flags,
            version,
            master_seed,
            iv,
            group_count,
            entry_count,
            contents_hash,
            master_seed_2,
            key_enc_rounds,
        })
    }
}
