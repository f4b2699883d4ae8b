//! Database file load and save.
//!
//! Load decrypts and verifies the whole file in memory before the model
//! is touched; a failure leaves the database in either its previous
//! state (envelope errors) or the empty state (record-stream errors),
//! never half-loaded. Save serializes, encrypts and writes through a
//! sibling temp file renamed over the target.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::{contents_hash, decrypt_payload, decrypt_payload_repair, encrypt_payload};
use crate::error::{DbError, DbResult};
use crate::format::fields::{
    apply_entry_field, apply_group_field, write_entry, write_group, FieldReader, FieldWriter,
};
use crate::format::{
    DbHeader, CIPHER_BLOCK_SIZE, FLAG_RIJNDAEL, FLAG_SHA2, FLAG_TWOFISH, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, VERSION,
};
use crate::keys::{derive_final_key, transform_master_key};
use crate::random::RandomSource;
use crate::types::{CipherAlgorithm, PwEntry, PwGroup, PwTime};

use super::PwDatabase;

/// Damage report filled in when a file is opened in repair mode.
///
/// Repair mode is a best-effort parse, not a recovery algorithm: it
/// truncates a misaligned ciphertext to the cipher block size and skips
/// the contents-hash check, so a wrong key is **not** detected. Never
/// use it for ordinary loads.
#[derive(Debug, Clone, Default)]
pub struct RepairInfo {
    /// Group count the damaged header claimed.
    pub original_group_count: u32,
    /// Entry count the damaged header claimed.
    pub original_entry_count: u32,
    /// Number of meta-stream carrier entries recognized and extracted.
    pub recognized_meta_streams: u32,
}

impl PwDatabase {
    /// Loads the database from `path`, replacing the in-memory model.
    ///
    /// Passing a [`RepairInfo`] enables repair mode.
    ///
    /// # Errors
    ///
    /// - [`DbError::NoFileAccessRead`] if the file cannot be read.
    /// - [`DbError::InvalidFileHeader`] / [`DbError::InvalidFileSignature`]
    ///   for malformed headers.
    /// - [`DbError::InvalidFileSize`] for a misaligned ciphertext
    ///   (non-repair mode).
    /// - [`DbError::InvalidKey`] when the decrypted contents fail the
    ///   hash check, which is the wrong-passphrase signal.
    /// - [`DbError::InvalidFileStructure`] when the record stream is
    ///   damaged; the model is left empty in that case.
    pub fn open_file(&mut self, path: &Path, mut repair: Option<&mut RepairInfo>) -> DbResult<()> {
        if path.as_os_str().is_empty() {
            return Err(DbError::InvalidParam("empty database path"));
        }

        let data = fs::read(path).map_err(DbError::NoFileAccessRead)?;
        if data.len() < HEADER_SIZE {
            return Err(DbError::InvalidFileHeader);
        }

        let header = DbHeader::decode(&data)?;
        let algorithm = select_algorithm(header.flags)?;

        let mut ciphertext = &data[HEADER_SIZE..];
        if ciphertext.len() % CIPHER_BLOCK_SIZE != 0 {
            if repair.is_none() {
                return Err(DbError::InvalidFileSize);
            }
            let cut = ciphertext.len() - ciphertext.len() % CIPHER_BLOCK_SIZE;
            warn!("repair: truncating ciphertext from {} to {cut} bytes", ciphertext.len());
            ciphertext = &ciphertext[..cut];
        }

        if let Some(info) = repair.as_deref_mut() {
            info.original_group_count = header.group_count;
            info.original_entry_count = header.entry_count;
        }

        let transformed = transform_master_key(
            self.master_key.as_bytes(),
            &header.master_seed_2,
            header.key_enc_rounds,
        )?;
        let final_key = derive_final_key(&header.master_seed, &transformed);

        let payload = if repair.is_some() {
            Zeroizing::new(decrypt_payload_repair(
                algorithm,
                &final_key,
                &header.iv,
                ciphertext,
            )?)
        } else {
            Zeroizing::new(decrypt_payload(algorithm, &final_key, &header.iv, ciphertext)?)
        };

        if repair.is_none() {
            let counts_demand_content = header.group_count != 0 || header.entry_count != 0;
            if payload.len() > MAX_PAYLOAD_SIZE || (payload.is_empty() && counts_demand_content) {
                return Err(DbError::InvalidKey);
            }
            if contents_hash(&payload) != header.contents_hash {
                return Err(DbError::InvalidKey);
            }
        }

        // The envelope checked out; from here on the model is replaced.
        self.new_database();
        self.algorithm = algorithm;
        self.key_enc_rounds = header.key_enc_rounds;

        if let Err(err) = self.parse_payload(&payload, &header) {
            // Never leave a half-loaded model behind.
            self.new_database();
            return Err(err);
        }

        self.last_header = Some(header);

        let extracted = self.load_and_remove_meta_streams(true);
        debug!("extracted {extracted} meta-streams");
        if let Some(info) = repair.as_deref_mut() {
            #[allow(clippy::cast_possible_truncation)]
            {
                info.recognized_meta_streams = extracted as u32;
            }
        }

        let orphans = self.delete_lost_entries();
        if orphans > 0 {
            // A well-formed file never produces orphans.
            warn!("load dropped {orphans} orphaned entries");
        }
        self.fix_group_tree();

        Ok(())
    }

    /// Saves the database to `path`.
    ///
    /// Meta-streams are injected for the duration of the save and
    /// stripped again on every exit path.
    ///
    /// # Errors
    ///
    /// - [`DbError::InvalidParam`] for an empty path.
    /// - [`DbError::CryptError`] if the cipher self-test fails.
    /// - [`DbError::NoFileAccessWrite`] / [`DbError::FileErrorWrite`] on
    ///   write failures.
    pub fn save_file(&mut self, path: &Path) -> DbResult<()> {
        if path.as_os_str().is_empty() {
            return Err(DbError::InvalidParam("empty database path"));
        }

        if let Err(err) = self.add_all_meta_streams() {
            // An empty database has no group to carry the streams.
            debug!("meta-stream injection skipped: {err}");
        }
        let result = self.save_inner(path);
        self.load_and_remove_meta_streams(false);
        result
    }

    fn save_inner(&mut self, path: &Path) -> DbResult<()> {
        // Serialize all groups, then all entries.
        let mut writer = FieldWriter::with_capacity(self.estimate_payload_size());
        for group in &self.groups {
            write_group(&mut writer, group);
        }
        for entry in &self.entries {
            let mut plain = Zeroizing::new(entry.password.clone());
            self.session.apply(&mut plain);
            write_entry(&mut writer, entry, &plain);
        }
        let payload = Zeroizing::new(writer.into_bytes());

        #[allow(clippy::cast_possible_truncation)]
        let mut header = DbHeader {
            flags: FLAG_SHA2
                | match self.algorithm {
                    CipherAlgorithm::Aes => FLAG_RIJNDAEL,
                    CipherAlgorithm::Twofish => FLAG_TWOFISH,
                },
            version: VERSION,
            master_seed: [0u8; 16],
            iv: [0u8; 16],
            group_count: self.groups.len() as u32,
            entry_count: self.entries.len() as u32,
            contents_hash: contents_hash(&payload),
            master_seed_2: [0u8; 32],
            key_enc_rounds: self.key_enc_rounds,
        };
        self.rng.fill_bytes(&mut header.master_seed)?;
        self.rng.fill_bytes(&mut header.iv)?;
        self.rng.fill_bytes(&mut header.master_seed_2)?;

        let transformed = transform_master_key(
            self.master_key.as_bytes(),
            &header.master_seed_2,
            self.key_enc_rounds,
        )?;
        let final_key = derive_final_key(&header.master_seed, &transformed);

        let ciphertext = encrypt_payload(self.algorithm, &final_key, &header.iv, &payload)?;

        let mut file_bytes = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        file_bytes.extend_from_slice(&header.encode());
        file_bytes.extend_from_slice(&ciphertext);
        write_atomic(path, &file_bytes, self.rng.as_mut())?;

        debug!(
            "saved {} groups and {} entries ({} bytes)",
            header.group_count,
            header.entry_count,
            file_bytes.len()
        );
        self.last_header = Some(header);
        Ok(())
    }

    /// Parses `group_count` group records then `entry_count` entry
    /// records out of the decrypted payload.
    fn parse_payload(&mut self, payload: &[u8], header: &DbHeader) -> DbResult<()> {
        let mut reader = FieldReader::new(payload);

        let mut group = fresh_group_template();
        let mut read_groups = 0u32;
        while read_groups < header.group_count {
            let (field_type, field) = reader.next_field()?;
            if apply_group_field(&mut group, field_type, field)? {
                if self.add_group(&group).is_err() {
                    warn!("skipping unstorable group record");
                }
                group = fresh_group_template();
                read_groups += 1;
            }
        }

        let mut entry = fresh_entry_template();
        let mut read_entries = 0u32;
        while read_entries < header.entry_count {
            let (field_type, field) = reader.next_field()?;
            if apply_entry_field(&mut entry, field_type, field)? {
                if self.add_entry(&entry).is_err() {
                    warn!("skipping entry record with unresolvable group id");
                }
                entry = fresh_entry_template();
                read_entries += 1;
            }
        }

        Ok(())
    }

    /// Upper-bound guess for the serialized payload size, so the writer
    /// allocates once.
    fn estimate_payload_size(&self) -> usize {
        let group_bytes: usize = self
            .groups
            .iter()
            .map(|g| 94 + g.name.len() + 1)
            .sum();
        let entry_bytes: usize = self
            .entries
            .iter()
            .map(|e| {
                134 + e.title.len()
                    + e.url.len()
                    + e.username.len()
                    + e.password.len()
                    + e.notes.len()
                    + e.binary_desc.len()
                    + e.binary.len()
                    + 6
            })
            .sum();
        group_bytes + entry_bytes
    }
}

/// Picks the payload cipher from the header flag bits.
fn select_algorithm(flags: u32) -> DbResult<CipherAlgorithm> {
    if flags & FLAG_RIJNDAEL != 0 {
        Ok(CipherAlgorithm::Aes)
    } else if flags & FLAG_TWOFISH != 0 {
        Ok(CipherAlgorithm::Twofish)
    } else {
        Err(DbError::InvalidFileStructure)
    }
}

fn fresh_group_template() -> PwGroup {
    let mut group = PwGroup::default();
    group.expire = PwTime::NEVER_EXPIRES;
    group
}

fn fresh_entry_template() -> PwEntry {
    let mut entry = PwEntry::default();
    entry.expire = PwTime::NEVER_EXPIRES;
    entry
}

/// Writes `bytes` to `path` through a salted sibling temp file renamed
/// over the target, so a crash never leaves a torn database behind.
fn write_atomic(path: &Path, bytes: &[u8], rng: &mut dyn RandomSource) -> DbResult<()> {
    let mut salt = [0u8; 6];
    rng.fill_bytes(&mut salt)?;

    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".");
    tmp_name.push(hex::encode(salt));
    let tmp = PathBuf::from(tmp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .map_err(DbError::NoFileAccessWrite)?;

    let written = file
        .write_all(bytes)
        .and_then(|()| file.sync_all())
        .and_then(|()| fs::rename(&tmp, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(DbError::FileErrorWrite(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{add_test_group, test_db};
    use super::*;
    use crate::keys::KeySource;

    fn saved_sample(dir: &Path) -> (PathBuf, PwDatabase) {
        let mut db = test_db();
        let gid = add_test_group(&mut db, "Internet", 0);
        db.add_entry(&PwEntry::template(gid, "Gmail", "alice", "hunter2"))
            .unwrap();
        db.set_master_key(&KeySource::Passphrase("abc")).unwrap();
        db.set_key_enc_rounds(600);

        let path = dir.join("sample.kdb");
        db.save_file(&path).unwrap();
        (path, db)
    }

    #[test]
    fn test_save_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (path, saved) = saved_sample(dir.path());

        let mut reopened = test_db();
        reopened.set_master_key(&KeySource::Passphrase("abc")).unwrap();
        reopened.open_file(&path, None).unwrap();

        assert_eq!(reopened.num_groups(), 1);
        assert_eq!(reopened.num_entries(), 1);
        assert_eq!(reopened.groups()[0].name, "Internet");
        let entry = reopened.entry(0).unwrap();
        assert_eq!(entry.title, "Gmail");
        assert_eq!(entry.username, "alice");
        assert_eq!(reopened.entry_password(0).unwrap().as_slice(), b"hunter2");
        // UUIDs survive the roundtrip.
        assert_eq!(entry.uuid, saved.entry(0).unwrap().uuid);
    }

    #[test]
    fn test_wrong_passphrase_is_invalid_key() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _saved) = saved_sample(dir.path());

        let mut reopened = test_db();
        reopened.set_master_key(&KeySource::Passphrase("abd")).unwrap();
        assert!(matches!(
            reopened.open_file(&path, None),
            Err(DbError::InvalidKey)
        ));
    }

    #[test]
    fn test_save_strips_meta_stream_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (_path, saved) = saved_sample(dir.path());
        // The synthetic UI-state entry must not linger after the save.
        assert_eq!(saved.num_entries(), 1);
        assert_eq!(saved.entries().iter().filter(|e| super::super::meta::is_meta_stream(e)).count(), 0);
    }

    #[test]
    fn test_header_counts_include_meta_streams() {
        let dir = tempfile::tempdir().unwrap();
        let (path, saved) = saved_sample(dir.path());

        let raw = fs::read(&path).unwrap();
        let header = DbHeader::decode(&raw).unwrap();
        assert_eq!(header.group_count, 1);
        // One real entry plus the UI-state stream.
        assert_eq!(header.entry_count, 2);
        assert_eq!(saved.last_header().unwrap().entry_count, 2);
    }

    #[test]
    fn test_truncated_file_is_invalid_header() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = saved_sample(dir.path());
        let raw = fs::read(&path).unwrap();
        fs::write(&path, &raw[..HEADER_SIZE - 4]).unwrap();

        let mut db = test_db();
        db.set_master_key(&KeySource::Passphrase("abc")).unwrap();
        assert!(matches!(
            db.open_file(&path, None),
            Err(DbError::InvalidFileHeader)
        ));
    }

    #[test]
    fn test_misaligned_ciphertext_is_invalid_size() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = saved_sample(dir.path());
        let mut raw = fs::read(&path).unwrap();
        raw.push(0xAA);
        fs::write(&path, &raw).unwrap();

        let mut db = test_db();
        db.set_master_key(&KeySource::Passphrase("abc")).unwrap();
        assert!(matches!(
            db.open_file(&path, None),
            Err(DbError::InvalidFileSize)
        ));
    }

    #[test]
    fn test_repair_mode_reads_misaligned_file() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = saved_sample(dir.path());
        let mut raw = fs::read(&path).unwrap();
        raw.push(0xAA);
        fs::write(&path, &raw).unwrap();

        let mut db = test_db();
        db.set_master_key(&KeySource::Passphrase("abc")).unwrap();
        let mut info = RepairInfo::default();
        db.open_file(&path, Some(&mut info)).unwrap();

        assert_eq!(info.original_group_count, 1);
        assert_eq!(info.original_entry_count, 2);
        assert_eq!(info.recognized_meta_streams, 1);
        assert_eq!(db.num_entries(), 1);
    }

    #[test]
    fn test_bad_signature_detected() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = saved_sample(dir.path());
        let mut raw = fs::read(&path).unwrap();
        raw[0] ^= 0xFF;
        fs::write(&path, &raw).unwrap();

        let mut db = test_db();
        db.set_master_key(&KeySource::Passphrase("abc")).unwrap();
        assert!(matches!(
            db.open_file(&path, None),
            Err(DbError::InvalidFileSignature)
        ));
    }

    #[test]
    fn test_missing_cipher_flag_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = saved_sample(dir.path());
        let mut raw = fs::read(&path).unwrap();
        // Clear the cipher selection bits, keep SHA2.
        raw[8..12].copy_from_slice(&FLAG_SHA2.to_le_bytes());
        fs::write(&path, &raw).unwrap();

        let mut db = test_db();
        db.set_master_key(&KeySource::Passphrase("abc")).unwrap();
        assert!(matches!(
            db.open_file(&path, None),
            Err(DbError::InvalidFileStructure)
        ));
    }

    #[test]
    fn test_twofish_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = test_db();
        let gid = add_test_group(&mut db, "G", 0);
        db.add_entry(&PwEntry::template(gid, "e", "u", "pw")).unwrap();
        db.set_master_key(&KeySource::Passphrase("tf")).unwrap();
        db.set_algorithm(CipherAlgorithm::Twofish);
        db.set_key_enc_rounds(60);

        let path = dir.path().join("twofish.kdb");
        db.save_file(&path).unwrap();

        let mut reopened = test_db();
        reopened.set_master_key(&KeySource::Passphrase("tf")).unwrap();
        reopened.open_file(&path, None).unwrap();
        assert_eq!(reopened.algorithm(), CipherAlgorithm::Twofish);
        assert_eq!(reopened.entry_password(0).unwrap().as_slice(), b"pw");
    }

    #[test]
    fn test_failed_save_still_strips_meta_streams() {
        let mut db = test_db();
        let gid = add_test_group(&mut db, "G", 0);
        db.add_entry(&PwEntry::template(gid, "e", "u", "pw")).unwrap();
        db.set_master_key(&KeySource::Passphrase("x")).unwrap();

        let result = db.save_file(Path::new("/nonexistent-dir/db.kdb"));
        assert!(result.is_err());
        assert_eq!(db.num_entries(), 1);
    }

    #[test]
    fn test_empty_path_rejected() {
        let mut db = test_db();
        assert!(matches!(
            db.save_file(Path::new("")),
            Err(DbError::InvalidParam(_))
        ));
        assert!(matches!(
            db.open_file(Path::new(""), None),
            Err(DbError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let (_path, _) = saved_sample(dir.path());

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sample.kdb".to_string()]);
    }
}
