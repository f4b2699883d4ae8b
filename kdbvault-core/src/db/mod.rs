//! The in-memory database: ordered groups and entries with CRUD, search,
//! ordering, merge and backup operations.
//!
//! # Contract notes
//!
//! - Templates passed to `add_entry`/`set_entry` carry cleartext
//!   passwords; stored entries keep them session-obfuscated.
//! - Returned indices are invalidated by any structural mutation.
//! - The database is a single-threaded mutable container; callers
//!   serialize access externally.

mod io;
mod meta;
mod tree;

pub use io::RepairInfo;
pub use meta::{is_meta_stream, MetaStream};

use log::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{DbError, DbResult};
use crate::format::DbHeader;
use crate::keys::composite::{self, KeySource};
use crate::keys::{MasterKey, STD_KEY_ENC_ROUNDS};
use crate::obfuscate::SessionCipher;
use crate::random::{random_uuid, OsRandomSource, RandomSource, XorShift128};
use crate::types::{
    is_reserved_group_id, CipherAlgorithm, EntryUuid, PwEntry, PwGroup, PwTime, SortField,
    SEARCH_GROUP_NAME, SEARCH_NOTES, SEARCH_PASSWORD, SEARCH_TITLE, SEARCH_URL, SEARCH_USER_NAME,
};

/// Name of the group that receives entry backups.
pub const BACKUP_GROUP_NAME: &str = "Backup";

/// Icon assigned to a freshly created backup group.
const BACKUP_GROUP_IMAGE: u32 = 4;

/// UI selection state persisted through the meta-stream layer.
#[derive(Debug, Clone, Default)]
pub struct UiState {
    /// Id of the group last selected in the UI.
    pub last_selected_group_id: u32,
    /// Id of the group last scrolled to the top of the list.
    pub last_top_visible_group_id: u32,
    /// UUID of the entry last selected in the UI.
    pub last_selected_entry_uuid: EntryUuid,
    /// UUID of the entry last scrolled to the top of the list.
    pub last_top_visible_entry_uuid: EntryUuid,
}

/// An encrypted password database.
pub struct PwDatabase {
    groups: Vec<PwGroup>,
    entries: Vec<PwEntry>,
    master_key: MasterKey,
    session: SessionCipher,
    algorithm: CipherAlgorithm,
    key_enc_rounds: u32,
    last_header: Option<DbHeader>,
    unknown_meta_streams: Vec<MetaStream>,
    ui_state: UiState,
    last_edited_uuid: Option<EntryUuid>,
    rng: Box<dyn RandomSource>,
    idgen: XorShift128,
}

impl PwDatabase {
    /// Creates an empty database using the operating system's randomness.
    ///
    /// # Errors
    ///
    /// Propagates [`DbError::InvalidRandomSource`] if the session key or
    /// id generator cannot be seeded.
    pub fn new() -> DbResult<Self> {
        Self::with_random_source(Box::new(OsRandomSource))
    }

    /// Creates an empty database with an injected random source.
    ///
    /// # Errors
    ///
    /// Propagates [`DbError::InvalidRandomSource`] from the source.
    pub fn with_random_source(mut rng: Box<dyn RandomSource>) -> DbResult<Self> {
        let session = SessionCipher::new(rng.as_mut())?;
        let idgen = XorShift128::from_source(rng.as_mut())?;
        Ok(Self {
            groups: Vec::new(),
            entries: Vec::new(),
            master_key: MasterKey::empty(),
            session,
            algorithm: CipherAlgorithm::Aes,
            key_enc_rounds: STD_KEY_ENC_ROUNDS,
            last_header: None,
            unknown_meta_streams: Vec::new(),
            ui_state: UiState::default(),
            last_edited_uuid: None,
            rng,
            idgen,
        })
    }

    /// Resets the database to its empty state, wiping all records.
    ///
    /// The master key, cipher selection and UI state survive; use
    /// [`clear_master_key`](Self::clear_master_key) to drop the key too.
    pub fn new_database(&mut self) {
        self.groups.clear();
        self.entries.clear();
        self.unknown_meta_streams.clear();
        self.last_edited_uuid = None;
    }

    // =========================================================================
    // Counts and plain accessors
    // =========================================================================

    /// Number of groups.
    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Number of entries.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// All groups in tree order.
    #[must_use]
    pub fn groups(&self) -> &[PwGroup] {
        &self.groups
    }

    /// All entries in array order.
    #[must_use]
    pub fn entries(&self) -> &[PwEntry] {
        &self.entries
    }

    /// The group at `index`.
    #[must_use]
    pub fn group(&self, index: usize) -> Option<&PwGroup> {
        self.groups.get(index)
    }

    /// Mutable access to the group at `index`. The caller is responsible
    /// for keeping ids unique and levels continuous.
    #[must_use]
    pub fn group_mut(&mut self, index: usize) -> Option<&mut PwGroup> {
        self.groups.get_mut(index)
    }

    /// The entry at `index`.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&PwEntry> {
        self.entries.get(index)
    }

    /// The entry last stored through `add_entry`/`set_entry`.
    #[must_use]
    pub fn last_edited_entry(&self) -> Option<&PwEntry> {
        let uuid = self.last_edited_uuid.as_ref()?;
        let index = self.entry_index_by_uuid(uuid)?;
        self.entries.get(index)
    }

    /// Header of the most recent successful load or save.
    #[must_use]
    pub fn last_header(&self) -> Option<&DbHeader> {
        self.last_header.as_ref()
    }

    /// The persisted UI selection state.
    #[must_use]
    pub fn ui_state(&self) -> &UiState {
        &self.ui_state
    }

    /// Mutable access to the persisted UI selection state.
    #[must_use]
    pub fn ui_state_mut(&mut self) -> &mut UiState {
        &mut self.ui_state
    }

    /// Unknown meta-streams preserved for round-trip.
    #[must_use]
    pub fn unknown_meta_streams(&self) -> &[MetaStream] {
        &self.unknown_meta_streams
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Index of the group with the given id.
    #[must_use]
    pub fn group_index_by_id(&self, id: u32) -> Option<usize> {
        self.groups.iter().position(|g| g.id == id)
    }

    /// The group with the given id.
    #[must_use]
    pub fn group_by_id(&self, id: u32) -> Option<&PwGroup> {
        self.group_index_by_id(id).map(|i| &self.groups[i])
    }

    /// Id of the first group whose name matches, case-insensitively.
    #[must_use]
    pub fn group_id_by_name(&self, name: &str) -> Option<u32> {
        let wanted = name.to_lowercase();
        self.groups
            .iter()
            .find(|g| g.name.to_lowercase() == wanted)
            .map(|g| g.id)
    }

    /// Id of the group at `index`.
    #[must_use]
    pub fn group_id_by_index(&self, index: usize) -> Option<u32> {
        self.groups.get(index).map(|g| g.id)
    }

    /// Index of the entry with the given UUID.
    #[must_use]
    pub fn entry_index_by_uuid(&self, uuid: &EntryUuid) -> Option<usize> {
        self.entries.iter().position(|e| e.uuid == *uuid)
    }

    /// The entry with the given UUID.
    #[must_use]
    pub fn entry_by_uuid(&self, uuid: &EntryUuid) -> Option<&PwEntry> {
        self.entry_index_by_uuid(uuid).map(|i| &self.entries[i])
    }

    /// Index of the `nth` entry whose `group_id` matches.
    #[must_use]
    pub fn entry_index_in_group(&self, group_id: u32, nth: usize) -> Option<usize> {
        if group_id == u32::MAX {
            return None;
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.group_id == group_id)
            .map(|(i, _)| i)
            .nth(nth)
    }

    /// The `nth` entry of the given group.
    #[must_use]
    pub fn entry_by_group(&self, group_id: u32, nth: usize) -> Option<&PwEntry> {
        self.entry_index_in_group(group_id, nth).map(|i| &self.entries[i])
    }

    /// Position of `entry` among the entries of its own group.
    #[must_use]
    pub fn entry_pos_in_group(&self, entry: &PwEntry) -> Option<usize> {
        self.entries
            .iter()
            .filter(|e| e.group_id == entry.group_id)
            .position(|e| e.uuid == entry.uuid)
    }

    /// Number of entries in the given group.
    #[must_use]
    pub fn items_in_group(&self, group_id: u32) -> usize {
        if group_id == u32::MAX {
            return 0;
        }
        self.entries.iter().filter(|e| e.group_id == group_id).count()
    }

    /// Number of entries in the group with the given name.
    #[must_use]
    pub fn items_in_group_by_name(&self, name: &str) -> usize {
        self.group_id_by_name(name)
            .map_or(0, |id| self.items_in_group(id))
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Appends an entry from a cleartext template.
    ///
    /// A zero UUID is replaced with a freshly generated unique one; the
    /// password is obfuscated as the entry is stored.
    ///
    /// # Errors
    ///
    /// - [`DbError::InvalidParam`] if the template references a reserved
    ///   group id.
    /// - [`DbError::InvalidRandomSource`] if UUID generation fails.
    pub fn add_entry(&mut self, template: &PwEntry) -> DbResult<usize> {
        if is_reserved_group_id(template.group_id) {
            return Err(DbError::InvalidParam("entry group id is reserved"));
        }

        let mut entry = self.normalized_entry(template);
        if entry.uuid.is_zero() {
            entry.uuid = loop {
                let uuid = random_uuid(self.rng.as_mut())?;
                if self.entry_index_by_uuid(&uuid).is_none() {
                    break uuid;
                }
            };
        }

        self.last_edited_uuid = Some(entry.uuid);
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Appends a group from a template.
    ///
    /// A reserved id (0 or `u32::MAX`) is replaced with a fresh random
    /// id, rejection-sampled until it is unique and unreserved.
    ///
    /// # Errors
    ///
    /// Never fails today; the `Result` reserves room for allocation
    /// failures surfacing as [`DbError::NoMem`].
    pub fn add_group(&mut self, template: &PwGroup) -> DbResult<usize> {
        let mut group = template.clone();
        if is_reserved_group_id(group.id) {
            group.id = loop {
                let id = self.idgen.next_u32();
                if is_reserved_group_id(id) {
                    continue;
                }
                if self.group_index_by_id(id).is_none() {
                    break id;
                }
            };
        }

        self.groups.push(group);
        Ok(self.groups.len() - 1)
    }

    /// Replaces the entry at `index` with a deep copy of a cleartext
    /// template, re-obfuscating the password.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidParam`] on an out-of-range index or a reserved
    /// group id.
    pub fn set_entry(&mut self, index: usize, template: &PwEntry) -> DbResult<()> {
        if index >= self.entries.len() {
            return Err(DbError::InvalidParam("entry index out of range"));
        }
        if is_reserved_group_id(template.group_id) {
            return Err(DbError::InvalidParam("entry group id is reserved"));
        }

        let entry = self.normalized_entry(template);
        self.last_edited_uuid = Some(entry.uuid);
        self.entries[index] = entry;
        Ok(())
    }

    /// Replaces the group at `index` with a deep copy of the template.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidParam`] on an out-of-range index or a reserved
    /// group id.
    pub fn set_group(&mut self, index: usize, template: &PwGroup) -> DbResult<()> {
        if index >= self.groups.len() {
            return Err(DbError::InvalidParam("group index out of range"));
        }
        if is_reserved_group_id(template.id) {
            return Err(DbError::InvalidParam("group id is reserved"));
        }

        self.groups[index] = template.clone();
        Ok(())
    }

    /// Deletes the entry at `index`, wiping its buffers.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidParam`] on an out-of-range index.
    pub fn delete_entry(&mut self, index: usize) -> DbResult<()> {
        if index >= self.entries.len() {
            return Err(DbError::InvalidParam("entry index out of range"));
        }
        // The removed entry zeroizes itself on drop.
        self.entries.remove(index);
        Ok(())
    }

    /// Deletes the group with the given id along with all its entries,
    /// then repairs the tree levels.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidParam`] if no group has that id.
    pub fn delete_group_by_id(&mut self, group_id: u32) -> DbResult<()> {
        let index = self
            .group_index_by_id(group_id)
            .ok_or(DbError::InvalidParam("unknown group id"))?;

        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].group_id == group_id {
                self.entries.remove(i);
            } else {
                i += 1;
            }
        }

        self.groups.remove(index);
        self.fix_group_tree();
        Ok(())
    }

    /// Clones `template` and converts its cleartext password into the
    /// stored, obfuscated form.
    fn normalized_entry(&self, template: &PwEntry) -> PwEntry {
        let mut entry = template.clone();
        #[allow(clippy::cast_possible_truncation)]
        {
            entry.password_len = entry.password.len() as u32;
        }
        self.session.apply(&mut entry.password);
        entry
    }

    // =========================================================================
    // Password obfuscation boundary
    // =========================================================================

    /// XORs the stored password at `index` with the session keystream.
    ///
    /// Pairs with [`unlock_entry_password`](Self::unlock_entry_password);
    /// both apply the same involution.
    pub fn lock_entry_password(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            self.session.apply(&mut entry.password);
        }
    }

    /// Inverse of [`lock_entry_password`](Self::lock_entry_password).
    ///
    /// Every unlock must be paired with a lock on all paths, including
    /// early returns.
    pub fn unlock_entry_password(&mut self, index: usize) {
        self.lock_entry_password(index);
    }

    /// Returns a wiped-on-drop cleartext copy of the password at `index`
    /// without disturbing the stored, obfuscated buffer.
    #[must_use]
    pub fn entry_password(&self, index: usize) -> Option<Zeroizing<Vec<u8>>> {
        let entry = self.entries.get(index)?;
        let mut plain = Zeroizing::new(entry.password.clone());
        self.session.apply(&mut plain);
        Some(plain)
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Linear scan for `needle` from `start` over the fields selected by
    /// the `SEARCH_*` bits in `fields`. Returns the index of the first
    /// matching entry.
    ///
    /// An empty needle (or the single wildcard `"*"`) matches
    /// immediately at `start`.
    #[must_use]
    pub fn find(
        &self,
        needle: &str,
        case_sensitive: bool,
        fields: u32,
        start: usize,
    ) -> Option<usize> {
        if start >= self.entries.len() {
            return None;
        }

        let needle = if case_sensitive {
            needle.to_string()
        } else {
            needle.to_lowercase()
        };
        if needle.is_empty() || needle == "*" {
            return Some(start);
        }

        let matches = |haystack: &str| -> bool {
            if case_sensitive {
                haystack.contains(&needle)
            } else {
                haystack.to_lowercase().contains(&needle)
            }
        };

        for (i, entry) in self.entries.iter().enumerate().skip(start) {
            if fields & SEARCH_TITLE != 0 && matches(&entry.title) {
                return Some(i);
            }
            if fields & SEARCH_USER_NAME != 0 && matches(&entry.username) {
                return Some(i);
            }
            if fields & SEARCH_URL != 0 && matches(&entry.url) {
                return Some(i);
            }
            if fields & SEARCH_PASSWORD != 0 {
                let mut plain = Zeroizing::new(entry.password.clone());
                self.session.apply(&mut plain);
                if matches(&String::from_utf8_lossy(&plain)) {
                    return Some(i);
                }
            }
            if fields & SEARCH_NOTES != 0 && matches(&entry.notes) {
                return Some(i);
            }
            if fields & SEARCH_GROUP_NAME != 0 {
                let group_matches = self
                    .group_by_id(entry.group_id)
                    .is_some_and(|g| matches(&g.name));
                if group_matches {
                    return Some(i);
                }
            }
        }

        None
    }

    // =========================================================================
    // Moving
    // =========================================================================

    /// Moves the entry at `from` to position `to` by adjacent swaps,
    /// preserving the relative order of all other entries. Out-of-range
    /// indices are ignored.
    pub fn move_entry(&mut self, from: usize, to: usize) {
        move_by_swaps(&mut self.entries, from, to);
    }

    /// Moves an entry within its group: `from` and `to` are
    /// group-relative positions among the entries of `group_id`.
    pub fn move_in_group(&mut self, group_id: u32, from: usize, to: usize) {
        if from == to {
            return;
        }
        let (Some(from), Some(to)) = (
            self.entry_index_in_group(group_id, from),
            self.entry_index_in_group(group_id, to),
        ) else {
            return;
        };
        move_by_swaps(&mut self.entries, from, to);
    }

    /// Moves the group at `from` to position `to` by adjacent swaps,
    /// then repairs the tree levels.
    pub fn move_group(&mut self, from: usize, to: usize) {
        if from == to || from >= self.groups.len() || to >= self.groups.len() {
            return;
        }
        move_by_swaps(&mut self.groups, from, to);
        self.fix_group_tree();
    }

    // =========================================================================
    // Sorting
    // =========================================================================

    /// Sorts the entries of one group in place, leaving every other
    /// entry at its position.
    ///
    /// String fields order ascending, case-insensitively; time fields
    /// order newest-first. [`SortField::Uuid`] is a no-op.
    pub fn sort_group(&mut self, group_id: u32, field: SortField) {
        if matches!(field, SortField::Uuid) {
            return;
        }

        let positions: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.group_id == group_id)
            .map(|(i, _)| i)
            .collect();
        if positions.len() <= 1 {
            return;
        }

        // Selection sort over the group's slots; contents swap between
        // slots, slot positions stay fixed.
        for i in 0..positions.len() - 1 {
            let mut min = i;
            for j in i + 1..positions.len() {
                if self.entry_precedes(positions[j], positions[min], field) {
                    min = j;
                }
            }
            if min != i {
                self.entries.swap(positions[i], positions[min]);
            }
        }
    }

    /// Returns `true` if the entry at `a` sorts before the entry at `b`
    /// for the given field.
    fn entry_precedes(&self, a: usize, b: usize, field: SortField) -> bool {
        let (ea, eb) = (&self.entries[a], &self.entries[b]);
        match field {
            SortField::Title => caseless_lt(&ea.title, &eb.title),
            SortField::UserName => caseless_lt(&ea.username, &eb.username),
            SortField::Url => caseless_lt(&ea.url, &eb.url),
            SortField::Password => {
                let mut pa = Zeroizing::new(ea.password.clone());
                let mut pb = Zeroizing::new(eb.password.clone());
                self.session.apply(&mut pa);
                self.session.apply(&mut pb);
                caseless_lt(
                    &String::from_utf8_lossy(&pa),
                    &String::from_utf8_lossy(&pb),
                )
            }
            SortField::Notes => caseless_lt(&ea.notes, &eb.notes),
            // Time fields sort newest first.
            SortField::Creation => ea.creation > eb.creation,
            SortField::LastMod => ea.last_mod > eb.last_mod,
            SortField::LastAccess => ea.last_access > eb.last_access,
            SortField::Expire => ea.expire > eb.expire,
            SortField::Uuid => false,
        }
    }

    /// Sorts the whole group array by fully-qualified group path
    /// (ancestor names joined with a separator), case-insensitively and
    /// stably, then repairs the tree levels.
    pub fn sort_group_list(&mut self) {
        if self.groups.len() <= 1 {
            return;
        }

        // Build the fully-qualified name of every group under the
        // current tree shape. The id suffix keeps equal paths apart.
        let mut parents: Vec<String> = Vec::new();
        let mut keyed: Vec<(String, PwGroup)> = Vec::with_capacity(self.groups.len());
        for group in self.groups.drain(..) {
            parents.truncate(usize::from(group.level));
            let mut key = String::new();
            for parent in &parents {
                key.push_str(parent);
                key.push('\n');
            }
            key.push_str(&group.name);
            key.push_str("\n\n");
            key.push_str(&group.id.to_string());

            parents.push(group.name.clone());
            keyed.push((key.to_lowercase(), group));
        }

        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.groups = keyed.into_iter().map(|(_, g)| g).collect();

        self.fix_group_tree();
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Merges another database into this one.
    ///
    /// With `assign_new_ids`, every source group gets a fresh local id
    /// and the source's entries are rewritten to match, and every entry
    /// is imported under a fresh UUID. Otherwise records are matched by
    /// group id / entry UUID and the local copy is replaced when
    /// `compare_times` is off or the source was modified strictly later;
    /// replaced locals get their access time set to now. Source
    /// meta-streams are never imported. Finishes by collecting orphaned
    /// entries.
    ///
    /// # Errors
    ///
    /// Propagates allocation and randomness failures from the underlying
    /// add operations.
    pub fn merge_in(
        &mut self,
        source: &mut PwDatabase,
        assign_new_ids: bool,
        compare_times: bool,
    ) -> DbResult<()> {
        let now = PwTime::now();

        for i in 0..source.groups.len() {
            if assign_new_ids {
                loop {
                    let old_id = source.groups[i].id;
                    let mut template = source.groups[i].clone();
                    template.id = 0;
                    let index = self.add_group(&template)?;
                    let new_id = self.groups[index].id;

                    // The fresh id must not shadow another source group,
                    // or the entry rewrite below would misroute.
                    if source.group_by_id(new_id).is_none() {
                        source.subst_entry_group_ids(old_id, new_id);
                        break;
                    }
                    self.delete_group_by_id(new_id)?;
                }
            } else {
                let source_group = &source.groups[i];
                match self.group_index_by_id(source_group.id) {
                    None => {
                        self.add_group(source_group)?;
                    }
                    Some(index) => {
                        let replace =
                            !compare_times || source_group.last_mod > self.groups[index].last_mod;
                        if replace {
                            self.set_group(index, source_group)?;
                            self.groups[index].last_access = now;
                        }
                    }
                }
            }
        }

        self.fix_group_tree();

        for i in 0..source.entries.len() {
            if meta::is_meta_stream(&source.entries[i]) {
                continue;
            }

            // Clone with the password brought back to cleartext; the
            // template wipes itself on drop.
            let mut template = source.entries[i].clone();
            source.session.apply(&mut template.password);

            if assign_new_ids {
                template.uuid = EntryUuid::ZERO;
                self.add_entry(&template)?;
            } else {
                match self.entry_index_by_uuid(&template.uuid) {
                    None => {
                        self.add_entry(&template)?;
                    }
                    Some(index) => {
                        let replace =
                            !compare_times || template.last_mod > self.entries[index].last_mod;
                        if replace {
                            self.set_entry(index, &template)?;
                            self.entries[index].last_access = now;
                        }
                    }
                }
            }
        }

        let orphans = self.delete_lost_entries();
        if orphans > 0 {
            debug!("merge removed {orphans} orphaned entries");
        }
        Ok(())
    }

    /// Rewrites every entry referencing `old_id` to reference `new_id`.
    pub fn subst_entry_group_ids(&mut self, old_id: u32, new_id: u32) {
        if old_id == new_id {
            return;
        }
        for entry in &mut self.entries {
            if entry.group_id == old_id {
                entry.group_id = new_id;
            }
        }
    }

    // =========================================================================
    // Backup
    // =========================================================================

    /// Deep-copies a cleartext entry template into the backup group,
    /// creating the group on first use. The copy gets a fresh UUID and
    /// its modification time set to now.
    ///
    /// Returns `true` if the backup group had to be created.
    ///
    /// # Errors
    ///
    /// Propagates failures from group and entry insertion.
    pub fn backup_entry(&mut self, entry: &PwEntry) -> DbResult<bool> {
        let mut created = false;
        let group_id = match self.group_id_by_name(BACKUP_GROUP_NAME) {
            Some(id) => id,
            None => {
                let now = PwTime::now();
                let template = PwGroup {
                    id: 0,
                    name: BACKUP_GROUP_NAME.to_string(),
                    image_id: BACKUP_GROUP_IMAGE,
                    level: 0,
                    flags: 0,
                    creation: now,
                    last_mod: now,
                    last_access: now,
                    expire: PwTime::NEVER_EXPIRES,
                };
                let index = self.add_group(&template)?;
                created = true;
                self.groups[index].id
            }
        };

        let mut copy = entry.clone();
        copy.group_id = group_id;
        copy.uuid = EntryUuid::ZERO;
        copy.last_mod = PwTime::now();
        self.add_entry(&copy)?;
        Ok(created)
    }

    // =========================================================================
    // Binary attachments
    // =========================================================================

    /// Attaches a named binary blob to the entry at `index`, replacing
    /// any previous attachment.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidParam`] on an out-of-range index.
    pub fn attach_binary(&mut self, index: usize, desc: &str, data: &[u8]) -> DbResult<()> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(DbError::InvalidParam("entry index out of range"))?;
        entry.binary_desc = desc.to_string();
        entry.binary = data.to_vec();
        Ok(())
    }

    /// Attaches the contents of a file; the attachment description is
    /// the file name portion of `path`.
    ///
    /// # Errors
    ///
    /// - [`DbError::InvalidParam`] on an out-of-range index or an empty
    ///   file.
    /// - [`DbError::NoFileAccessRead`] if the file cannot be read.
    pub fn attach_file(&mut self, index: usize, path: &std::path::Path) -> DbResult<()> {
        let data = std::fs::read(path).map_err(DbError::NoFileAccessRead)?;
        if data.is_empty() {
            return Err(DbError::InvalidParam("attachment file is empty"));
        }
        let desc = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.attach_binary(index, &desc, &data)
    }

    /// Writes the attachment of the entry at `index` to a file.
    ///
    /// # Errors
    ///
    /// - [`DbError::InvalidParam`] if the index is out of range or the
    ///   entry has no attachment.
    /// - [`DbError::NoFileAccessWrite`] if the file cannot be written.
    pub fn save_binary_to(&self, index: usize, path: &std::path::Path) -> DbResult<()> {
        let entry = self
            .entries
            .get(index)
            .ok_or(DbError::InvalidParam("entry index out of range"))?;
        if entry.binary_desc.is_empty() {
            return Err(DbError::InvalidParam("entry has no attachment"));
        }
        std::fs::write(path, &entry.binary).map_err(DbError::NoFileAccessWrite)
    }

    /// Removes the attachment of the entry at `index`, wiping the bytes.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidParam`] on an out-of-range index.
    pub fn remove_binary(&mut self, index: usize) -> DbResult<()> {
        use zeroize::Zeroize;

        let entry = self
            .entries
            .get_mut(index)
            .ok_or(DbError::InvalidParam("entry index out of range"))?;
        entry.binary.zeroize();
        entry.binary = Vec::new();
        entry.binary_desc.clear();
        Ok(())
    }

    // =========================================================================
    // Key and cipher configuration
    // =========================================================================

    /// Derives and installs the raw master key from the given source.
    ///
    /// # Errors
    ///
    /// Propagates composition errors; see [`composite::compose`].
    pub fn set_master_key(&mut self, source: &KeySource<'_>) -> DbResult<()> {
        self.master_key = composite::compose(source)?;
        Ok(())
    }

    /// Generates a fresh key file and installs the resulting key,
    /// optionally composed with a passphrase.
    ///
    /// # Errors
    ///
    /// See [`composite::generate_key_file`].
    pub fn generate_master_key_file(
        &mut self,
        path: &std::path::Path,
        passphrase: Option<&str>,
        overwrite: bool,
    ) -> DbResult<()> {
        self.master_key =
            composite::generate_key_file(path, passphrase, overwrite, self.rng.as_mut())?;
        Ok(())
    }

    /// Copies the raw master key out for external lock/unlock handling.
    #[must_use]
    pub fn raw_master_key(&self) -> [u8; 32] {
        *self.master_key.as_bytes()
    }

    /// Installs a raw master key directly.
    pub fn set_raw_master_key(&mut self, key: &[u8; 32]) {
        self.master_key.set_bytes(key);
    }

    /// Zeroes the master key slot.
    pub fn clear_master_key(&mut self) {
        self.master_key.clear();
    }

    /// The payload cipher used for the next save.
    #[must_use]
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Selects the payload cipher for the next save.
    pub fn set_algorithm(&mut self, algorithm: CipherAlgorithm) {
        self.algorithm = algorithm;
    }

    /// The key stretching round count.
    #[must_use]
    pub fn key_enc_rounds(&self) -> u32 {
        self.key_enc_rounds
    }

    /// Sets the key stretching round count. `u32::MAX` is clamped to
    /// `u32::MAX - 1`.
    pub fn set_key_enc_rounds(&mut self, rounds: u32) {
        if rounds == u32::MAX {
            warn!("key_enc_rounds clamped to u32::MAX - 1");
            self.key_enc_rounds = u32::MAX - 1;
        } else {
            self.key_enc_rounds = rounds;
        }
    }
}

impl std::fmt::Debug for PwDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PwDatabase")
            .field("groups", &self.groups.len())
            .field("entries", &self.entries.len())
            .field("algorithm", &self.algorithm)
            .field("key_enc_rounds", &self.key_enc_rounds)
            .finish_non_exhaustive()
    }
}

/// Walks an element from `from` to `to` by adjacent swaps, shifting
/// everything in between by one position.
fn move_by_swaps<T>(items: &mut [T], from: usize, to: usize) {
    if from == to || from >= items.len() || to >= items.len() {
        return;
    }
    let mut i = from;
    while i != to {
        let next = if from < to { i + 1 } else { i - 1 };
        items.swap(i, next);
        i = next;
    }
}

/// Case-insensitive "less than" on strings.
fn caseless_lt(a: &str, b: &str) -> bool {
    a.to_lowercase() < b.to_lowercase()
}
