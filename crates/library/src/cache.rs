use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use common::SongRecord;
use parking_lot::Mutex;
use redb::{Database, DatabaseError, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::LibraryError;

const CACHE_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const SONGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("songs");

const META_VERSION_KEY: &str = "version";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub mod_time: u64,
    pub data: SongRecord,
}

/// Path-keyed song cache. Loaded once per scan, mutated in memory by the
/// extraction workers and written back in a single transaction.
pub struct CacheStore {
    path: Option<PathBuf>,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    dirty: HashSet<String>,
    removed: HashSet<String>,
}

impl CacheStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn empty(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Never fails: a missing, locked or corrupt cache yields an empty store.
    pub fn load(path: &Path) -> Self {
        let store = Self::empty(path.to_path_buf());
        if !path.exists() {
            debug!("No song cache at {:?}", path);
            return store;
        }
        match read_entries(path) {
            Ok(entries) => {
                info!("Loaded {} cached songs from {:?}", entries.len(), path);
                store.state.lock().entries = entries;
            }
            Err(err) => {
                warn!("Song cache at {:?} unreadable ({}); starting empty", path, err);
            }
        }
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, path: &str) -> Option<CacheEntry> {
        self.state.lock().entries.get(path).cloned()
    }

    /// Returns the cached record only when the stored mod time matches exactly.
    pub fn lookup(&self, path: &str, mod_time: u64) -> Option<SongRecord> {
        let state = self.state.lock();
        state
            .entries
            .get(path)
            .filter(|entry| entry.mod_time == mod_time)
            .map(|entry| entry.data.clone())
    }

    pub fn insert(&self, path: String, mod_time: u64, data: SongRecord) {
        let mut state = self.state.lock();
        state.removed.remove(&path);
        state.dirty.insert(path.clone());
        state.entries.insert(path, CacheEntry { mod_time, data });
    }

    /// Drops entries under `root` that this scan did not see and whose file
    /// is gone from disk. Entries belonging to other roots are left alone.
    pub fn prune_missing(&self, root: &Path, seen: &HashSet<String>) -> usize {
        let mut state = self.state.lock();
        let stale: Vec<String> = state
            .entries
            .keys()
            .filter(|key| !seen.contains(*key))
            .filter(|key| {
                let path = Path::new(key.as_str());
                path.starts_with(root) && !path.exists()
            })
            .cloned()
            .collect();
        for key in &stale {
            state.entries.remove(key);
            state.dirty.remove(key);
            state.removed.insert(key.clone());
        }
        if !stale.is_empty() {
            debug!("Pruned {} stale cache entries under {:?}", stale.len(), root);
        }
        stale.len()
    }

    /// Writes every change made since load in one transaction. Returns the
    /// number of entries written or removed.
    pub fn persist(&self) -> Result<usize, LibraryError> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return Ok(0),
        };

        let (upserts, removals) = {
            let state = self.state.lock();
            let upserts: Vec<(String, CacheEntry)> = state
                .dirty
                .iter()
                .filter_map(|key| state.entries.get(key).map(|e| (key.clone(), e.clone())))
                .collect();
            let removals: Vec<String> = state.removed.iter().cloned().collect();
            (upserts, removals)
        };

        let db = open_for_write(&path)?;
        let write_txn = db.begin_write()?;
        {
            let stale = {
                let meta_table = write_txn.open_table(META_TABLE)?;
                let stored = meta_table
                    .get(META_VERSION_KEY)?
                    .and_then(|value| decode_value::<u32>(value.value()).ok());
                stored != Some(CACHE_VERSION)
            };
            if stale {
                clear_table(&write_txn, SONGS_TABLE)?;
            }

            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&CACHE_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;

            let mut songs_table = write_txn.open_table(SONGS_TABLE)?;
            for (key, entry) in &upserts {
                let bytes = encode_value(entry)?;
                songs_table.insert(key.as_str(), bytes.as_slice())?;
            }
            for key in &removals {
                songs_table.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;

        let mut state = self.state.lock();
        for (key, _) in &upserts {
            state.dirty.remove(key);
        }
        for key in &removals {
            state.removed.remove(key);
        }
        Ok(upserts.len() + removals.len())
    }
}

fn read_entries(path: &Path) -> Result<HashMap<String, CacheEntry>, LibraryError> {
    let db = Database::open(path)?;
    let read_txn = db.begin_read()?;
    let meta_table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };
    let version: Option<u32> = match meta_table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    match version {
        Some(CACHE_VERSION) => {}
        Some(other) => return Err(LibraryError::VersionMismatch(other)),
        None => return Ok(HashMap::new()),
    }

    let songs_table = match read_txn.open_table(SONGS_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };
    let mut entries = HashMap::new();
    for entry in songs_table.iter()? {
        let entry = entry?;
        let key = entry.0.value().to_string();
        let value: CacheEntry = decode_value(entry.1.value())?;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn open_for_write(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if !path.exists() {
        return Ok(Database::create(path)?);
    }
    match Database::open(path) {
        Ok(db) => Ok(db),
        Err(err @ DatabaseError::DatabaseAlreadyOpen) => Err(err.into()),
        Err(err) => {
            warn!("Replacing unreadable song cache at {:?}: {}", path, err);
            fs::remove_file(path)?;
            Ok(Database::create(path)?)
        }
    }
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}
