//! Core type definitions for the password database model.
//!
//! Groups form a flattened ordered tree: the array order *is* the tree,
//! and the parent of a group is the nearest preceding group whose level is
//! one less. Entries are leaf records referencing their group by id.

use std::fmt;

use chrono::{Datelike, Timelike};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Reserved group id meaning "unassigned"; never stored.
pub const GROUP_ID_UNASSIGNED: u32 = 0;

/// Reserved group id used as an invalid/sentinel marker; never stored.
pub const GROUP_ID_INVALID: u32 = u32::MAX;

/// Returns `true` if `id` is one of the two reserved group id values.
#[must_use]
pub const fn is_reserved_group_id(id: u32) -> bool {
    id == GROUP_ID_UNASSIGNED || id == GROUP_ID_INVALID
}

// Search field mask

/// Match against entry titles.
pub const SEARCH_TITLE: u32 = 0x0001;
/// Match against user names.
pub const SEARCH_USER_NAME: u32 = 0x0002;
/// Match against URLs.
pub const SEARCH_URL: u32 = 0x0004;
/// Match against passwords (unlocked transiently for the comparison).
pub const SEARCH_PASSWORD: u32 = 0x0008;
/// Match against the notes field.
pub const SEARCH_NOTES: u32 = 0x0010;
/// Match against the name of the entry's group.
pub const SEARCH_GROUP_NAME: u32 = 0x0020;

/// Title sentinel marking a TAN (transaction number) entry.
pub const TAN_ENTRY_TITLE: &str = "<TAN>";

// =============================================================================
// EntryUuid
// =============================================================================

/// A 16-byte entry identifier, unique within a database.
///
/// The all-zero UUID is a sentinel meaning "assign a fresh one on add";
/// it never appears on a stored entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Zeroize)]
pub struct EntryUuid(pub [u8; 16]);

impl EntryUuid {
    /// The all-zero sentinel UUID.
    pub const ZERO: Self = Self([0u8; 16]);

    /// Creates an `EntryUuid` from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns `true` for the all-zero sentinel.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }

    /// Converts the UUID to a hexadecimal string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for EntryUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryUuid({})", self.to_hex())
    }
}

impl fmt::Display for EntryUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// =============================================================================
// PwTime
// =============================================================================

/// A calendar timestamp with second resolution.
///
/// On the wire this packs into 5 bytes (see `format::timefield`). The
/// field order gives the derived ordering chronological meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Zeroize)]
pub struct PwTime {
    /// Year (0..=16383 representable on the wire).
    pub year: u16,
    /// Month, 1-based.
    pub month: u8,
    /// Day of month, 1-based.
    pub day: u8,
    /// Hour, 0..=23.
    pub hour: u8,
    /// Minute, 0..=59.
    pub minute: u8,
    /// Second, 0..=59.
    pub second: u8,
}

impl PwTime {
    /// The sentinel timestamp meaning "never expires".
    pub const NEVER_EXPIRES: Self = Self {
        year: 2999,
        month: 12,
        day: 28,
        hour: 23,
        minute: 59,
        second: 59,
    };

    /// Returns the current local wall-clock time.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self {
            year: now.year().clamp(0, 16383) as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
        }
    }

    /// Returns `true` if this is the never-expires sentinel.
    #[must_use]
    pub fn is_never_expires(&self) -> bool {
        *self == Self::NEVER_EXPIRES
    }
}

impl Default for PwTime {
    fn default() -> Self {
        Self {
            year: 2004,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

// =============================================================================
// PwGroup
// =============================================================================

/// A node in the flattened group tree.
#[derive(Debug, Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct PwGroup {
    /// Non-zero, non-sentinel group id, unique within the database.
    pub id: u32,
    /// Group name.
    pub name: String,
    /// Icon selector, opaque to the core.
    pub image_id: u32,
    /// Tree depth. The parent of a group is the nearest preceding group
    /// with `level` one less; the first group must have level 0.
    pub level: u16,
    /// Opaque flag bits.
    pub flags: u32,
    /// Creation time.
    pub creation: PwTime,
    /// Last modification time.
    pub last_mod: PwTime,
    /// Last access time.
    pub last_access: PwTime,
    /// Expiry time; [`PwTime::NEVER_EXPIRES`] means no expiry.
    pub expire: PwTime,
}

impl PwGroup {
    /// Creates a group template with the given name at level 0.
    ///
    /// The id is left unassigned so the database allocates a fresh one;
    /// timestamps default to "created now, never expires".
    #[must_use]
    pub fn with_name(name: &str) -> Self {
        let now = PwTime::now();
        let mut group = Self::default();
        group.id = GROUP_ID_UNASSIGNED;
        group.name = name.to_string();
        group.creation = now;
        group.last_mod = now;
        group.last_access = now;
        group.expire = PwTime::NEVER_EXPIRES;
        group
    }
}

// =============================================================================
// PwEntry
// =============================================================================

/// A leaf record belonging to exactly one group.
///
/// On a stored entry the `password` buffer holds the session-obfuscated
/// form; `password_len` is the cleartext byte length (XOR obfuscation
/// preserves length, so the two agree). Templates passed to the database
/// carry the cleartext. All fields are wiped on drop.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct PwEntry {
    /// Entry UUID; zero means "assign one on add".
    pub uuid: EntryUuid,
    /// Id of the owning group.
    pub group_id: u32,
    /// Icon selector, opaque to the core.
    pub image_id: u32,
    /// Title.
    pub title: String,
    /// URL.
    pub url: String,
    /// User name.
    pub username: String,
    /// Password bytes (UTF-8; obfuscated at rest in memory).
    pub password: Vec<u8>,
    /// Cleartext byte length of the password.
    pub password_len: u32,
    /// Free-form notes. Also names the stream on meta-stream entries.
    pub notes: String,
    /// Description of the binary attachment, empty if none.
    pub binary_desc: String,
    /// Opaque binary attachment, empty if none.
    pub binary: Vec<u8>,
    /// Creation time.
    pub creation: PwTime,
    /// Last modification time.
    pub last_mod: PwTime,
    /// Last access time.
    pub last_access: PwTime,
    /// Expiry time; [`PwTime::NEVER_EXPIRES`] means no expiry.
    pub expire: PwTime,
}

impl PwEntry {
    /// Creates an entry template in `group_id` with cleartext `password`.
    ///
    /// The UUID is left zero so the database assigns a fresh one.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn template(group_id: u32, title: &str, username: &str, password: &str) -> Self {
        let now = PwTime::now();
        let mut entry = Self::default();
        entry.group_id = group_id;
        entry.title = title.to_string();
        entry.username = username.to_string();
        entry.password = password.as_bytes().to_vec();
        entry.password_len = password.len() as u32;
        entry.creation = now;
        entry.last_mod = now;
        entry.last_access = now;
        entry.expire = PwTime::NEVER_EXPIRES;
        entry
    }

    /// Returns `true` if the title carries the TAN entry sentinel.
    ///
    /// This is a pure classifier; the core attaches no further TAN
    /// semantics.
    #[must_use]
    pub fn is_tan(&self) -> bool {
        self.title == TAN_ENTRY_TITLE
    }
}

impl fmt::Debug for PwEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PwEntry")
            .field("uuid", &self.uuid)
            .field("group_id", &self.group_id)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("password_len", &self.password_len)
            .field("binary_desc", &self.binary_desc)
            .field("binary_len", &self.binary.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Symmetric cipher used for the database payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherAlgorithm {
    /// AES-256 in CBC mode.
    #[default]
    Aes,
    /// Twofish-256 in CBC mode.
    Twofish,
}

/// Field selector for [`sort_group`](crate::PwDatabase::sort_group).
///
/// String fields sort ascending, case-insensitively. Time fields sort
/// newest-first. [`SortField::Uuid`] cannot order entries and is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    /// Sort by title.
    Title,
    /// Sort by user name.
    UserName,
    /// Sort by URL.
    Url,
    /// Sort by password (unlocked transiently for each comparison).
    Password,
    /// Sort by notes.
    Notes,
    /// Sort by creation time, newest first.
    Creation,
    /// Sort by last modification time, newest first.
    LastMod,
    /// Sort by last access time, newest first.
    LastAccess,
    /// Sort by expiry time, latest first.
    Expire,
    /// No ordering; sorting by UUID is a no-op.
    Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_group_ids() {
        assert!(is_reserved_group_id(0));
        assert!(is_reserved_group_id(u32::MAX));
        assert!(!is_reserved_group_id(1));
        assert!(!is_reserved_group_id(0xDEAD_BEEF));
    }

    #[test]
    fn test_uuid_zero_sentinel() {
        assert!(EntryUuid::ZERO.is_zero());
        assert!(EntryUuid::default().is_zero());
        assert!(!EntryUuid::new([1u8; 16]).is_zero());
    }

    #[test]
    fn test_uuid_hex() {
        let uuid = EntryUuid::new([0xAB; 16]);
        assert_eq!(uuid.to_hex(), "ab".repeat(16));
        assert_eq!(format!("{uuid:?}"), format!("EntryUuid({})", "ab".repeat(16)));
    }

    #[test]
    fn test_time_ordering_is_chronological() {
        let a = PwTime {
            year: 2023,
            month: 5,
            day: 1,
            hour: 12,
            minute: 0,
            second: 0,
        };
        let b = PwTime {
            year: 2023,
            month: 5,
            day: 1,
            hour: 12,
            minute: 0,
            second: 1,
        };
        let c = PwTime {
            year: 2024,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert!(a < b);
        assert!(b < c);
        assert!(PwTime::NEVER_EXPIRES > c);
    }

    #[test]
    fn test_never_expires_sentinel() {
        assert!(PwTime::NEVER_EXPIRES.is_never_expires());
        assert!(!PwTime::default().is_never_expires());
        assert_eq!(PwTime::NEVER_EXPIRES.year, 2999);
        assert_eq!(PwTime::NEVER_EXPIRES.day, 28);
    }

    #[test]
    fn test_entry_template_password_len() {
        let e = PwEntry::template(7, "Gmail", "alice", "hunter2");
        assert_eq!(e.password_len, 7);
        assert_eq!(e.password, b"hunter2");
        assert!(e.uuid.is_zero());
        assert!(e.expire.is_never_expires());
    }

    #[test]
    fn test_tan_classifier() {
        let mut e = PwEntry::template(1, TAN_ENTRY_TITLE, "", "123456");
        assert!(e.is_tan());
        e.title = "Gmail".to_string();
        assert!(!e.is_tan());
    }
}
