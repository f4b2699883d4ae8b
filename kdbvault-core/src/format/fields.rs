//! Type-length-value field codec for group and entry records.
//!
//! Each field is `u16 field_type` LE, `u32 field_size` LE, then
//! `field_size` payload bytes. A record ends with the terminator field
//! (`0xFFFF`, size 0). Unknown field types are tolerated and skipped on
//! read and never produced on write.

use crate::error::{DbError, DbResult};
use crate::types::{EntryUuid, PwEntry, PwGroup, PwTime};

use super::timefield::{pack_time, unpack_time, PACKED_TIME_SIZE};
use super::{
    ENTRY_FIELD_BINARY, ENTRY_FIELD_BINARY_DESC, ENTRY_FIELD_CREATION, ENTRY_FIELD_EXPIRE,
    ENTRY_FIELD_GROUP_ID, ENTRY_FIELD_IMAGE_ID, ENTRY_FIELD_LAST_ACCESS, ENTRY_FIELD_LAST_MOD,
    ENTRY_FIELD_NOTES, ENTRY_FIELD_PASSWORD, ENTRY_FIELD_TITLE, ENTRY_FIELD_URL,
    ENTRY_FIELD_USER_NAME, ENTRY_FIELD_UUID, FIELD_TERMINATOR, GROUP_FIELD_CREATION,
    GROUP_FIELD_EXPIRE, GROUP_FIELD_FLAGS, GROUP_FIELD_ID, GROUP_FIELD_IMAGE_ID,
    GROUP_FIELD_LAST_ACCESS, GROUP_FIELD_LAST_MOD, GROUP_FIELD_LEVEL, GROUP_FIELD_NAME,
};

// =============================================================================
// FieldWriter
// =============================================================================

/// Serializes TLV fields into a growing byte buffer.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    /// Creates a writer with a pre-sized buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Appends one field.
    #[allow(clippy::cast_possible_truncation)]
    pub fn field(&mut self, field_type: u16, payload: &[u8]) {
        self.buf.extend_from_slice(&field_type.to_le_bytes());
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
    }

    /// Appends a u16 field.
    pub fn u16_field(&mut self, field_type: u16, value: u16) {
        self.field(field_type, &value.to_le_bytes());
    }

    /// Appends a u32 field.
    pub fn u32_field(&mut self, field_type: u16, value: u32) {
        self.field(field_type, &value.to_le_bytes());
    }

    /// Appends a text field: UTF-8 bytes plus the trailing NUL, which is
    /// included in the field size.
    pub fn string_field(&mut self, field_type: u16, value: &str) {
        self.raw_string_field(field_type, value.as_bytes());
    }

    /// Appends a text field from raw bytes (used for password buffers).
    #[allow(clippy::cast_possible_truncation)]
    pub fn raw_string_field(&mut self, field_type: u16, value: &[u8]) {
        self.buf.extend_from_slice(&field_type.to_le_bytes());
        self.buf
            .extend_from_slice(&((value.len() + 1) as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
        self.buf.push(0);
    }

    /// Appends a packed timestamp field.
    pub fn time_field(&mut self, field_type: u16, value: &PwTime) {
        self.field(field_type, &pack_time(value));
    }

    /// Appends the record terminator.
    pub fn terminator(&mut self) {
        self.field(FIELD_TERMINATOR, &[]);
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer, returning the serialized bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// FieldReader
// =============================================================================

/// Walks TLV fields over a payload slice with bounds checking.
#[derive(Debug)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// Creates a reader over `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Reads the next field, returning its type and payload.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidFileStructure`] if the field header or
    /// payload overruns the remaining data.
    pub fn next_field(&mut self) -> DbResult<(u16, &'a [u8])> {
        let header_end = self
            .pos
            .checked_add(6)
            .ok_or(DbError::InvalidFileStructure)?;
        if header_end > self.data.len() {
            return Err(DbError::InvalidFileStructure);
        }

        let field_type = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        let field_size = u32::from_le_bytes([
            self.data[self.pos + 2],
            self.data[self.pos + 3],
            self.data[self.pos + 4],
            self.data[self.pos + 5],
        ]) as usize;

        let payload_end = header_end
            .checked_add(field_size)
            .ok_or(DbError::InvalidFileStructure)?;
        if payload_end > self.data.len() {
            return Err(DbError::InvalidFileStructure);
        }

        let payload = &self.data[header_end..payload_end];
        self.pos = payload_end;
        Ok((field_type, payload))
    }

    /// Current byte offset into the payload.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` when the whole payload has been consumed.
    #[must_use]
    pub const fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}

// =============================================================================
// Payload decoding
// =============================================================================

fn payload_u16(payload: &[u8]) -> DbResult<u16> {
    if payload.len() < 2 {
        return Err(DbError::InvalidFileStructure);
    }
    Ok(u16::from_le_bytes([payload[0], payload[1]]))
}

fn payload_u32(payload: &[u8]) -> DbResult<u32> {
    if payload.len() < 4 {
        return Err(DbError::InvalidFileStructure);
    }
    Ok(u32::from_le_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

fn payload_uuid(payload: &[u8]) -> DbResult<EntryUuid> {
    if payload.len() < 16 {
        return Err(DbError::InvalidFileStructure);
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&payload[..16]);
    Ok(EntryUuid::new(bytes))
}

fn payload_time(payload: &[u8]) -> DbResult<PwTime> {
    if payload.len() < PACKED_TIME_SIZE {
        return Err(DbError::InvalidFileStructure);
    }
    let mut bytes = [0u8; PACKED_TIME_SIZE];
    bytes.copy_from_slice(&payload[..PACKED_TIME_SIZE]);
    Ok(unpack_time(&bytes))
}

/// Decodes a NUL-terminated UTF-8 payload, dropping the terminator.
fn payload_string(payload: &[u8]) -> String {
    let text = payload.strip_suffix(&[0]).unwrap_or(payload);
    String::from_utf8_lossy(text).into_owned()
}

// =============================================================================
// Group records
// =============================================================================

/// Serializes one group record, terminator included.
pub fn write_group(w: &mut FieldWriter, group: &PwGroup) {
    w.u32_field(GROUP_FIELD_ID, group.id);
    w.string_field(GROUP_FIELD_NAME, &group.name);
    w.time_field(GROUP_FIELD_CREATION, &group.creation);
    w.time_field(GROUP_FIELD_LAST_MOD, &group.last_mod);
    w.time_field(GROUP_FIELD_LAST_ACCESS, &group.last_access);
    w.time_field(GROUP_FIELD_EXPIRE, &group.expire);
    w.u32_field(GROUP_FIELD_IMAGE_ID, group.image_id);
    w.u16_field(GROUP_FIELD_LEVEL, group.level);
    w.u32_field(GROUP_FIELD_FLAGS, group.flags);
    w.terminator();
}

/// Applies one decoded field to a group under construction.
///
/// Returns `true` when the field was the terminator. Unknown field types
/// are skipped.
///
/// # Errors
///
/// Returns [`DbError::InvalidFileStructure`] if a fixed-size payload is
/// shorter than its type requires.
pub fn apply_group_field(group: &mut PwGroup, field_type: u16, payload: &[u8]) -> DbResult<bool> {
    match field_type {
        GROUP_FIELD_ID => group.id = payload_u32(payload)?,
        GROUP_FIELD_NAME => group.name = payload_string(payload),
        GROUP_FIELD_CREATION => group.creation = payload_time(payload)?,
        GROUP_FIELD_LAST_MOD => group.last_mod = payload_time(payload)?,
        GROUP_FIELD_LAST_ACCESS => group.last_access = payload_time(payload)?,
        GROUP_FIELD_EXPIRE => group.expire = payload_time(payload)?,
        GROUP_FIELD_IMAGE_ID => group.image_id = payload_u32(payload)?,
        GROUP_FIELD_LEVEL => group.level = payload_u16(payload)?,
        GROUP_FIELD_FLAGS => group.flags = payload_u32(payload)?,
        FIELD_TERMINATOR => return Ok(true),
        _ => {} // Unknown field, skip.
    }
    Ok(false)
}

// =============================================================================
// Entry records
// =============================================================================

/// Serializes one entry record, terminator included.
///
/// The password is passed separately in cleartext; the caller unlocks the
/// entry around this call and wipes the buffer afterwards.
pub fn write_entry(w: &mut FieldWriter, entry: &PwEntry, password_plain: &[u8]) {
    w.field(ENTRY_FIELD_UUID, entry.uuid.as_bytes());
    w.u32_field(ENTRY_FIELD_GROUP_ID, entry.group_id);
    w.u32_field(ENTRY_FIELD_IMAGE_ID, entry.image_id);
    w.string_field(ENTRY_FIELD_TITLE, &entry.title);
    w.string_field(ENTRY_FIELD_URL, &entry.url);
    w.string_field(ENTRY_FIELD_USER_NAME, &entry.username);
    w.raw_string_field(ENTRY_FIELD_PASSWORD, password_plain);
    w.string_field(ENTRY_FIELD_NOTES, &entry.notes);
    w.time_field(ENTRY_FIELD_CREATION, &entry.creation);
    w.time_field(ENTRY_FIELD_LAST_MOD, &entry.last_mod);
    w.time_field(ENTRY_FIELD_LAST_ACCESS, &entry.last_access);
    w.time_field(ENTRY_FIELD_EXPIRE, &entry.expire);
    w.string_field(ENTRY_FIELD_BINARY_DESC, &entry.binary_desc);
    w.field(ENTRY_FIELD_BINARY, &entry.binary);
    w.terminator();
}

/// Applies one decoded field to an entry under construction.
///
/// Returns `true` when the field was the terminator. Unknown field types
/// are skipped. Passwords arrive in cleartext; the database locks them
/// when the finished entry is added.
///
/// # Errors
///
/// Returns [`DbError::InvalidFileStructure`] if a fixed-size payload is
/// shorter than its type requires.
#[allow(clippy::cast_possible_truncation)]
pub fn apply_entry_field(entry: &mut PwEntry, field_type: u16, payload: &[u8]) -> DbResult<bool> {
    match field_type {
        ENTRY_FIELD_UUID => entry.uuid = payload_uuid(payload)?,
        ENTRY_FIELD_GROUP_ID => entry.group_id = payload_u32(payload)?,
        ENTRY_FIELD_IMAGE_ID => entry.image_id = payload_u32(payload)?,
        ENTRY_FIELD_TITLE => entry.title = payload_string(payload),
        ENTRY_FIELD_URL => entry.url = payload_string(payload),
        ENTRY_FIELD_USER_NAME => entry.username = payload_string(payload),
        ENTRY_FIELD_PASSWORD => {
            let text = payload.strip_suffix(&[0]).unwrap_or(payload);
            entry.password = text.to_vec();
            entry.password_len = text.len() as u32;
        }
        ENTRY_FIELD_NOTES => entry.notes = payload_string(payload),
        ENTRY_FIELD_CREATION => entry.creation = payload_time(payload)?,
        ENTRY_FIELD_LAST_MOD => entry.last_mod = payload_time(payload)?,
        ENTRY_FIELD_LAST_ACCESS => entry.last_access = payload_time(payload)?,
        ENTRY_FIELD_EXPIRE => entry.expire = payload_time(payload)?,
        ENTRY_FIELD_BINARY_DESC => entry.binary_desc = payload_string(payload),
        ENTRY_FIELD_BINARY => entry.binary = payload.to_vec(),
        FIELD_TERMINATOR => return Ok(true),
        _ => {} // Unknown field, skip.
    }
    Ok(false)
}
