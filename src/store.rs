//! Persistent share log (§4.7): an append-only, line-oriented record of every
//! share and verified-hash marker this node has ever kept, split across
//! `10 MB` rotated files so nothing needs to be rewritten to drop old data.
//!
//! Each line is `<type_id> <hex>\n`: `5` for a full share (the packed
//! [`share::WireShare`] envelope), `2` for a bare verified-hash announcement
//! (just the 32-byte hash). Two indexes track liveness: `known` records
//! where on disk each hash actually lives, authoritative for what `open`
//! will return on restart; each file's `desired_shares`/`desired_hashes`
//! sets record what the caller still wants kept, so a file whose desired
//! sets both go empty (via [`ShareStore::forget_share`] /
//! [`ShareStore::forget_verified_hash`]) can be deleted outright instead of
//! rewritten.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::ShareChainError;
use crate::hash::Hash256;
use crate::pack::Packable;
use crate::params::Params;
use crate::share::{self, AnyShare};

const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
const RECORD_SHARE: u32 = 5;
const RECORD_VERIFIED_HASH: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Share,
    VerifiedHash,
}

#[derive(Debug, Default)]
struct FileState {
    size: u64,
    desired_shares: HashSet<Hash256>,
    desired_hashes: HashSet<Hash256>,
}

impl FileState {
    fn is_empty(&self) -> bool {
        self.desired_shares.is_empty() && self.desired_hashes.is_empty()
    }
}

/// Everything `ShareStore::open` recovers from disk, handed back to the
/// caller to re-populate its own [`crate::tracker::Tracker`]/verified set.
pub struct Loaded {
    pub shares: Vec<AnyShare>,
    pub verified_hashes: Vec<Hash256>,
}

/// An append-only share log rooted at `<dir>/<prefix><N>`.
pub struct ShareStore {
    dir: PathBuf,
    prefix: String,
    current_index: u64,
    writer: BufWriter<File>,
    files: HashMap<u64, FileState>,
    known: HashMap<Hash256, (u64, RecordKind)>,
}

impl ShareStore {
    /// Opens (creating if absent) the log at `dir` with file names
    /// `<prefix><N>`, replaying every existing file in index order. Returns
    /// the opened store plus everything it found on disk; every recovered
    /// record starts out desired in its own file, since nothing has yet
    /// told the store it can let any of it go.
    pub fn open(dir: impl AsRef<Path>, prefix: impl Into<String>, params: &Params) -> Result<(Self, Loaded), ShareChainError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let prefix = prefix.into();

        let mut indexes: Vec<u64> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(suffix) = name.strip_prefix(prefix.as_str()) else { continue };
            if let Ok(n) = suffix.parse::<u64>() {
                indexes.push(n);
            }
        }
        indexes.sort_unstable();
        let current_index = indexes.last().copied().unwrap_or(0);

        let mut store = ShareStore {
            writer: BufWriter::new(open_for_append(&dir.join(format!("{prefix}{current_index}")))?),
            dir,
            prefix,
            current_index,
            files: HashMap::new(),
            known: HashMap::new(),
        };

        let mut loaded = Loaded { shares: Vec::new(), verified_hashes: Vec::new() };
        if indexes.is_empty() {
            store.files.insert(0, FileState::default());
            return Ok((store, loaded));
        }

        for idx in indexes {
            store.load_file(idx, params, &mut loaded)?;
        }
        Ok((store, loaded))
    }

    fn path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, index))
    }

    fn load_file(&mut self, index: u64, params: &Params, loaded: &mut Loaded) -> Result<(), ShareChainError> {
        let path = self.path(index);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.files.insert(index, FileState::default());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = FileState::default();
        let mut size = 0u64;
        for line in BufReader::new(file).lines() {
            let line = line?;
            size += line.len() as u64 + 1;
            match parse_line(&line, params) {
                Ok((RecordKind::Share, hash, share)) => {
                    self.known.insert(hash, (index, RecordKind::Share));
                    state.desired_shares.insert(hash);
                    loaded.shares.push(share.expect("share record carries a share"));
                }
                Ok((RecordKind::VerifiedHash, hash, _)) => {
                    self.known.insert(hash, (index, RecordKind::VerifiedHash));
                    state.desired_hashes.insert(hash);
                    loaded.verified_hashes.push(hash);
                }
                Err(reason) => {
                    log::warn!("store: skipping corrupt line in {}: {reason}", path.display());
                }
            }
        }
        state.size = size;
        self.files.insert(index, state);
        Ok(())
    }

    fn append(&mut self, index: u64, type_id: u32, data: &[u8]) -> Result<u64, ShareChainError> {
        let mut line = format!("{type_id} ");
        line.push_str(&hex::encode(data));
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        let len = line.len() as u64;
        self.files.entry(index).or_default().size += len;
        Ok(len)
    }

    /// Rotates to a new file if the current one has crossed 10 MB, so the
    /// write about to happen lands in a fresh file rather than an
    /// already-oversized one.
    fn rotate_if_needed(&mut self) -> Result<(), ShareChainError> {
        let size = self.files.get(&self.current_index).map(|f| f.size).unwrap_or(0);
        if size < MAX_FILE_BYTES {
            return Ok(());
        }
        self.current_index += 1;
        self.writer = BufWriter::new(open_for_append(&self.path(self.current_index))?);
        self.files.insert(self.current_index, FileState::default());
        Ok(())
    }

    /// Appends a share if not already known (idempotent), marking it
    /// desired in the file it lands in.
    pub fn add_share(&mut self, share: &AnyShare) -> Result<(), ShareChainError> {
        let hash = share.hash();
        if self.known.contains_key(&hash) {
            return Ok(());
        }
        self.rotate_if_needed()?;
        let envelope = share::as_share(share);
        let mut bytes = Vec::new();
        envelope.pack(&mut bytes);
        self.append(self.current_index, RECORD_SHARE, &bytes)?;
        let index = self.current_index;
        self.known.insert(hash, (index, RecordKind::Share));
        self.files.entry(index).or_default().desired_shares.insert(hash);
        Ok(())
    }

    /// Appends a verified-hash marker if not already known, marking it
    /// desired in the file it lands in.
    pub fn add_verified_hash(&mut self, hash: Hash256) -> Result<(), ShareChainError> {
        if self.known.contains_key(&hash) {
            return Ok(());
        }
        self.rotate_if_needed()?;
        self.append(self.current_index, RECORD_VERIFIED_HASH, hash.as_bytes())?;
        let index = self.current_index;
        self.known.insert(hash, (index, RecordKind::VerifiedHash));
        self.files.entry(index).or_default().desired_hashes.insert(hash);
        Ok(())
    }

    /// Marks a previously stored share as no longer needed, garbage
    /// collecting its file once nothing in it is desired any more.
    pub fn forget_share(&mut self, hash: &Hash256) -> Result<(), ShareChainError> {
        if let Some(&(index, RecordKind::Share)) = self.known.get(hash) {
            if let Some(state) = self.files.get_mut(&index) {
                state.desired_shares.remove(hash);
            }
            self.check_remove(index)?;
        }
        Ok(())
    }

    /// Marks a previously stored verified-hash marker as no longer needed.
    pub fn forget_verified_hash(&mut self, hash: &Hash256) -> Result<(), ShareChainError> {
        if let Some(&(index, RecordKind::VerifiedHash)) = self.known.get(hash) {
            if let Some(state) = self.files.get_mut(&index) {
                state.desired_hashes.remove(hash);
            }
            self.check_remove(index)?;
        }
        Ok(())
    }

    /// Deletes `index`'s file from disk and drops its `known` entries once
    /// both its desired sets are empty. Never removes the file currently
    /// being written to.
    fn check_remove(&mut self, index: u64) -> Result<(), ShareChainError> {
        if index == self.current_index {
            return Ok(());
        }
        let empty = self.files.get(&index).map(FileState::is_empty).unwrap_or(false);
        if !empty {
            return Ok(());
        }
        self.known.retain(|_, (file_index, _)| *file_index != index);
        self.files.remove(&index);
        let path = self.path(index);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.known.contains_key(hash)
    }
}

fn open_for_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Parses one log line into `(kind, hash, share-if-it-was-one)`. Errors are
/// returned as a display string rather than [`ShareChainError`] so the
/// caller can log-and-skip per line instead of aborting the whole replay.
fn parse_line(line: &str, params: &Params) -> Result<(RecordKind, Hash256, Option<AnyShare>), String> {
    let (type_id, hex_data) = line.split_once(' ').ok_or("missing type/data separator")?;
    let type_id: u32 = type_id.parse().map_err(|_| "non-numeric type id".to_string())?;
    let data = hex::decode(hex_data).map_err(|e| format!("bad hex: {e}"))?;

    match type_id {
        RECORD_SHARE => {
            let share = share::load_share(&data, params).map_err(|e| e.to_string())?;
            let hash = share.hash();
            Ok((RecordKind::Share, hash, Some(share)))
        }
        RECORD_VERIFIED_HASH => {
            if data.len() != 32 {
                return Err(format!("verified-hash record has {} bytes, expected 32", data.len()));
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&data);
            Ok((RecordKind::VerifiedHash, Hash256::from_bytes(arr), None))
        }
        other => Err(format!("unknown record type {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::{AnyShare, GenerateParams, ShareBuilder};
    use crate::tracker::Tracker;

    fn sample_share(params: &Params) -> AnyShare {
        let tracker = Tracker::new();
        let gp = GenerateParams::test_default(None, params, &tracker);
        let builder = ShareBuilder::generate(gp).unwrap();
        AnyShare::V9(builder.seal_v9_for_test(1))
    }

    #[test]
    fn round_trips_a_share_through_close_and_reopen() {
        let params = Params::test_params();
        let dir = tempfile::tempdir().unwrap();
        let share = sample_share(&params);
        let hash = share.hash();

        {
            let (mut store, loaded) = ShareStore::open(dir.path(), "shares", &params).unwrap();
            assert!(loaded.shares.is_empty());
            store.add_share(&share).unwrap();
            assert!(store.contains(&hash));
        }

        let (store, loaded) = ShareStore::open(dir.path(), "shares", &params).unwrap();
        assert_eq!(loaded.shares.len(), 1);
        assert_eq!(loaded.shares[0].hash(), hash);
        assert!(store.contains(&hash));
    }

    #[test]
    fn adding_the_same_share_twice_is_a_no_op() {
        let params = Params::test_params();
        let dir = tempfile::tempdir().unwrap();
        let share = sample_share(&params);
        let (mut store, _) = ShareStore::open(dir.path(), "shares", &params).unwrap();
        store.add_share(&share).unwrap();
        store.add_share(&share).unwrap();

        let path = dir.path().join("shares0");
        let lines = fs::read_to_string(path).unwrap().lines().count();
        assert_eq!(lines, 1);
    }

    #[test]
    fn verified_hash_markers_round_trip() {
        let params = Params::test_params();
        let dir = tempfile::tempdir().unwrap();
        let hash = Hash256::from_bytes([9u8; 32]);

        {
            let (mut store, _) = ShareStore::open(dir.path(), "shares", &params).unwrap();
            store.add_verified_hash(hash).unwrap();
        }

        let (store, loaded) = ShareStore::open(dir.path(), "shares", &params).unwrap();
        assert_eq!(loaded.verified_hashes, vec![hash]);
        assert!(store.contains(&hash));
    }

    #[test]
    fn forgetting_every_record_in_a_rotated_file_deletes_it() {
        let params = Params::test_params();
        let dir = tempfile::tempdir().unwrap();
        let (mut store, _) = ShareStore::open(dir.path(), "shares", &params).unwrap();

        let hash = Hash256::from_bytes([3u8; 32]);
        store.add_verified_hash(hash).unwrap();
        // Force rotation so file 0 is no longer the currently-open file.
        store.files.get_mut(&0).unwrap().size = MAX_FILE_BYTES;
        let other = Hash256::from_bytes([4u8; 32]);
        store.add_verified_hash(other).unwrap();
        assert_eq!(store.current_index, 1);

        store.forget_verified_hash(&hash).unwrap();
        assert!(!dir.path().join("shares0").exists());
        assert!(!store.contains(&hash));
        assert!(store.contains(&other));
    }

    #[test]
    fn corrupt_lines_are_skipped_not_fatal() {
        let params = Params::test_params();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shares0"), "not a valid line\n5 zzzz\n").unwrap();

        let (_, loaded) = ShareStore::open(dir.path(), "shares", &params).unwrap();
        assert!(loaded.shares.is_empty());
        assert!(loaded.verified_hashes.is_empty());
    }
}
