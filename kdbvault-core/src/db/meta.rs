//! Meta-stream layer: auxiliary state embedded as synthetic entries.
//!
//! A meta-stream is an entry whose identity fields all match a fixed
//! sentinel marker; the `notes` field names the stream and the binary
//! attachment carries its payload. Streams the engine understands (the
//! UI selection state) are unpacked into database fields; everything
//! else is preserved verbatim so foreign state survives a round-trip.

use log::debug;

use crate::error::{DbError, DbResult};
use crate::types::{EntryUuid, PwEntry, PwTime};

use super::PwDatabase;

/// Title of every meta-stream entry.
pub const META_STREAM_TITLE: &str = "Meta-Info";

/// User name of every meta-stream entry.
pub const META_STREAM_USER: &str = "SYSTEM";

/// URL of every meta-stream entry.
pub const META_STREAM_URL: &str = "$";

/// Binary description of every meta-stream entry.
pub const META_STREAM_BINARY_DESC: &str = "bin-stream";

/// Name of the UI selection state stream.
pub const STREAM_SIMPLE_UI_STATE: &str = "Simple UI State";

/// Name of the custom icon stream written by some sibling applications;
/// consecutive identical payloads of this stream are deduplicated.
pub const STREAM_KPX_CUSTOM_ICONS: &str = "KPX_CUSTOM_ICONS_2";

/// An unrecognized meta-stream, preserved by name and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaStream {
    /// Stream name (the `notes` field of the carrier entry).
    pub name: String,
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

/// Returns `true` if the entry carries the meta-stream sentinel marker.
#[must_use]
pub fn is_meta_stream(entry: &PwEntry) -> bool {
    !entry.binary.is_empty()
        && !entry.notes.is_empty()
        && entry.binary_desc == META_STREAM_BINARY_DESC
        && entry.title == META_STREAM_TITLE
        && entry.username == META_STREAM_USER
        && entry.url == META_STREAM_URL
        && entry.image_id == 0
}

impl PwDatabase {
    /// Appends one synthetic meta-stream entry to the first group.
    ///
    /// Empty payloads are silently dropped.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidParam`] if the database has no groups to attach
    /// the carrier entry to.
    fn add_meta_stream(&mut self, name: &str, data: &[u8]) -> DbResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let Some(first_group_id) = self.group_id_by_index(0) else {
            return Err(DbError::InvalidParam("meta-stream needs at least one group"));
        };

        let entry = PwEntry {
            uuid: EntryUuid::ZERO,
            group_id: first_group_id,
            image_id: 0,
            title: META_STREAM_TITLE.to_string(),
            url: META_STREAM_URL.to_string(),
            username: META_STREAM_USER.to_string(),
            password: Vec::new(),
            password_len: 0,
            notes: name.to_string(),
            binary_desc: META_STREAM_BINARY_DESC.to_string(),
            binary: data.to_vec(),
            creation: PwTime::NEVER_EXPIRES,
            last_mod: PwTime::NEVER_EXPIRES,
            last_access: PwTime::NEVER_EXPIRES,
            expire: PwTime::NEVER_EXPIRES,
        };
        self.add_entry(&entry)?;
        Ok(())
    }

    /// Injects the UI state stream and every preserved unknown stream as
    /// synthetic entries, ahead of serialization.
    pub(super) fn add_all_meta_streams(&mut self) -> DbResult<()> {
        let state = self.pack_ui_state();
        self.add_meta_stream(STREAM_SIMPLE_UI_STATE, &state)?;

        for i in 0..self.unknown_meta_streams.len() {
            let stream = self.unknown_meta_streams[i].clone();
            self.add_meta_stream(&stream.name, &stream.data)?;
        }
        Ok(())
    }

    /// Removes every meta-stream entry from the model, routing each to
    /// its consumer. Returns the number of carrier entries removed.
    ///
    /// With `accept_unknown` set, unrecognized streams are pushed onto
    /// the preservation list; otherwise they are dropped (used when
    /// stripping the synthetic entries after a save).
    pub(super) fn load_and_remove_meta_streams(&mut self, accept_unknown: bool) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.entries.len() {
            if is_meta_stream(&self.entries[i]) {
                let entry = self.entries.remove(i);
                self.parse_meta_stream(&entry, accept_unknown);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Routes one extracted meta-stream entry.
    fn parse_meta_stream(&mut self, entry: &PwEntry, accept_unknown: bool) {
        if entry.notes == STREAM_SIMPLE_UI_STATE {
            self.unpack_ui_state(&entry.binary);
        } else if accept_unknown {
            let stream = MetaStream {
                name: entry.notes.clone(),
                data: entry.binary.clone(),
            };
            if self.can_ignore_unknown_stream(&stream) {
                debug!("dropping duplicate {} meta-stream", stream.name);
            } else {
                self.unknown_meta_streams.push(stream);
            }
        }
    }

    /// Duplicate custom-icon streams are stored only once: a stream is
    /// ignorable when it repeats the most recently preserved payload.
    fn can_ignore_unknown_stream(&self, stream: &MetaStream) -> bool {
        if stream.name != STREAM_KPX_CUSTOM_ICONS {
            return false;
        }
        self.unknown_meta_streams
            .last()
            .is_some_and(|last| last.data == stream.data)
    }

    /// Serializes the UI selection state into its 40-byte stream form.
    fn pack_ui_state(&self) -> [u8; 40] {
        let mut buf = [0u8; 40];
        buf[0..4].copy_from_slice(&self.ui_state.last_selected_group_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ui_state.last_top_visible_group_id.to_le_bytes());
        buf[8..24].copy_from_slice(self.ui_state.last_selected_entry_uuid.as_bytes());
        buf[24..40].copy_from_slice(self.ui_state.last_top_visible_entry_uuid.as_bytes());
        buf
    }

    /// Progressively decodes the UI state by available payload length,
    /// tolerating short streams written by older versions.
    fn unpack_ui_state(&mut self, data: &[u8]) {
        if data.len() >= 4 {
            self.ui_state.last_selected_group_id =
                u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        }
        if data.len() >= 8 {
            self.ui_state.last_top_visible_group_id =
                u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        }
        if data.len() >= 24 {
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&data[8..24]);
            self.ui_state.last_selected_entry_uuid = EntryUuid::new(uuid);
        }
        if data.len() >= 40 {
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&data[24..40]);
            self.ui_state.last_top_visible_entry_uuid = EntryUuid::new(uuid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{add_test_group, test_db};
    use super::*;

    #[test]
    fn test_marker_recognition() {
        let mut entry = PwEntry::default();
        entry.title = META_STREAM_TITLE.to_string();
        entry.username = META_STREAM_USER.to_string();
        entry.url = META_STREAM_URL.to_string();
        entry.binary_desc = META_STREAM_BINARY_DESC.to_string();
        entry.notes = "Some Stream".to_string();
        entry.binary = vec![1, 2, 3];
        entry.group_id = 1;
        assert!(is_meta_stream(&entry));

        entry.image_id = 4;
        assert!(!is_meta_stream(&entry));
        entry.image_id = 0;

        entry.binary.clear();
        assert!(!is_meta_stream(&entry));
        entry.binary = vec![1];

        entry.title = "Not Meta".to_string();
        assert!(!is_meta_stream(&entry));
    }

    #[test]
    fn test_inject_and_extract_roundtrip() {
        let mut db = test_db();
        add_test_group(&mut db, "Root", 0);

        db.ui_state_mut().last_selected_group_id = 7;
        db.ui_state_mut().last_selected_entry_uuid = EntryUuid::new([9u8; 16]);
        db.unknown_meta_streams.push(MetaStream {
            name: "Foreign".to_string(),
            data: vec![0xDE, 0xAD],
        });

        db.add_all_meta_streams().unwrap();
        assert_eq!(db.num_entries(), 2);
        assert!(is_meta_stream(db.entry(0).unwrap()));

        // Fresh state on the consumer side.
        db.ui_state_mut().last_selected_group_id = 0;
        db.ui_state_mut().last_selected_entry_uuid = EntryUuid::ZERO;
        db.unknown_meta_streams.clear();

        let removed = db.load_and_remove_meta_streams(true);
        assert_eq!(removed, 2);
        assert_eq!(db.num_entries(), 0);
        assert_eq!(db.ui_state().last_selected_group_id, 7);
        assert_eq!(db.ui_state().last_selected_entry_uuid, EntryUuid::new([9u8; 16]));
        assert_eq!(db.unknown_meta_streams().len(), 1);
        assert_eq!(db.unknown_meta_streams()[0].name, "Foreign");
        assert_eq!(db.unknown_meta_streams()[0].data, vec![0xDE, 0xAD]);
    }

    #[test]
    fn test_strip_after_save_does_not_duplicate_unknowns() {
        let mut db = test_db();
        add_test_group(&mut db, "Root", 0);
        db.unknown_meta_streams.push(MetaStream {
            name: "Foreign".to_string(),
            data: vec![1, 2, 3],
        });

        db.add_all_meta_streams().unwrap();
        // accept_unknown = false: stripping must not re-store streams.
        db.load_and_remove_meta_streams(false);
        assert_eq!(db.num_entries(), 0);
        assert_eq!(db.unknown_meta_streams().len(), 1);
    }

    #[test]
    fn test_custom_icon_dedup() {
        let mut db = test_db();
        add_test_group(&mut db, "Root", 0);

        let payload = vec![0xAA, 0xBB];
        for _ in 0..2 {
            let mut entry = PwEntry::default();
            entry.title = META_STREAM_TITLE.to_string();
            entry.username = META_STREAM_USER.to_string();
            entry.url = META_STREAM_URL.to_string();
            entry.binary_desc = META_STREAM_BINARY_DESC.to_string();
            entry.notes = STREAM_KPX_CUSTOM_ICONS.to_string();
            entry.binary = payload.clone();
            entry.group_id = db.group_id_by_index(0).unwrap();
            entry.uuid = EntryUuid::ZERO;
            db.add_entry(&entry).unwrap();
        }

        db.load_and_remove_meta_streams(true);
        // The identical duplicate was dropped.
        assert_eq!(db.unknown_meta_streams().len(), 1);
        assert_eq!(db.unknown_meta_streams()[0].data, payload);
    }

    #[test]
    fn test_distinct_icon_payloads_both_kept() {
        let mut db = test_db();
        let gid = add_test_group(&mut db, "Root", 0);

        for payload in [vec![1u8], vec![2u8]] {
            let mut entry = PwEntry::default();
            entry.title = META_STREAM_TITLE.to_string();
            entry.username = META_STREAM_USER.to_string();
            entry.url = META_STREAM_URL.to_string();
            entry.binary_desc = META_STREAM_BINARY_DESC.to_string();
            entry.notes = STREAM_KPX_CUSTOM_ICONS.to_string();
            entry.binary = payload;
            entry.group_id = gid;
            db.add_entry(&entry).unwrap();
        }

        db.load_and_remove_meta_streams(true);
        assert_eq!(db.unknown_meta_streams().len(), 2);
    }

    #[test]
    fn test_progressive_ui_state_decode() {
        let mut db = test_db();

        // Only the first field is present.
        db.unpack_ui_state(&42u32.to_le_bytes());
        assert_eq!(db.ui_state().last_selected_group_id, 42);
        assert_eq!(db.ui_state().last_top_visible_group_id, 0);

        // Eight bytes reach the second field.
        let mut eight = Vec::new();
        eight.extend_from_slice(&1u32.to_le_bytes());
        eight.extend_from_slice(&2u32.to_le_bytes());
        db.unpack_ui_state(&eight);
        assert_eq!(db.ui_state().last_top_visible_group_id, 2);
        assert!(db.ui_state().last_selected_entry_uuid.is_zero());
    }

    #[test]
    fn test_meta_stream_requires_a_group() {
        let mut db = test_db();
        assert!(matches!(
            db.add_meta_stream("X", &[1]),
            Err(DbError::InvalidParam(_))
        ));
        // Empty payloads are a silent no-op regardless.
        db.add_meta_stream("X", &[]).unwrap();
    }
}
