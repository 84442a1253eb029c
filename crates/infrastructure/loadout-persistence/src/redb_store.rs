use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use loadout_config::DATABASE_FILE_NAME;
use loadout_core::{DiskStateEntry, GameInstallId, GameInstallMetadata, Hash, Loadout, LoadoutId};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::api::{DbState, StoreOp, StoreTransaction, CURRENT_SCHEMA};
use crate::codec::{decode, encode};
use crate::maintenance::quarantine_corrupt_file;
use crate::state_key::StateKey;
use crate::{LoadoutDataStore, StorageError};

const META: TableDefinition<&str, &str> = TableDefinition::new("meta");
const INSTALLS: TableDefinition<&str, &[u8]> = TableDefinition::new("installs");
const LOADOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("loadouts");
const DISK_STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("disk_state");
const APPLIED_STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("applied_state");
const PINS: TableDefinition<&[u8], &str> = TableDefinition::new("pins");

const META_FORMAT_KEY: &str = "format";
const META_FORMAT_VALUE: &str = "loadout-redb";
const META_SCHEMA_VERSION: &str = "schema_version";
const META_CREATED_AT: &str = "created_at";
const META_LAST_COMMIT_AT: &str = "last_commit_at";

type ByteTable<'txn, V> = redb::Table<'txn, &'static [u8], V>;

/// redb-backed store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct RedbLoadoutDataStore {
    root: Utf8PathBuf,
}

impl RedbLoadoutDataStore {
    fn is_corrupt_open_error(err: &redb::DatabaseError) -> bool {
        match err {
            redb::DatabaseError::Storage(storage) => match storage {
                redb::StorageError::Corrupted(_) => true,
                redb::StorageError::Io(ioe) => matches!(
                    ioe.kind(),
                    std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
                ),
                _ => false,
            },
            _ => false,
        }
    }

    fn db_cache() -> &'static Mutex<HashMap<Utf8PathBuf, Arc<Database>>> {
        static CACHE: OnceLock<Mutex<HashMap<Utf8PathBuf, Arc<Database>>>> = OnceLock::new();
        CACHE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for_root(root: &Utf8Path) -> Utf8PathBuf {
        root.join(DATABASE_FILE_NAME)
    }

    fn open(&self) -> Result<Arc<Database>, StorageError> {
        let path = Self::path_for_root(&self.root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut cache = Self::db_cache().lock().map_err(|_| StorageError::Poisoned)?;
        if let Some(existing) = cache.get(&path) {
            if path.exists() {
                return Ok(existing.clone());
            }
            cache.remove(&path);
        }

        let db = if path.exists() {
            match Database::open(path.as_std_path()) {
                Ok(db) => db,
                Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                    return Err(StorageError::DatabaseAlreadyOpen);
                }
                Err(e) if Self::is_corrupt_open_error(&e) => {
                    let _ = quarantine_corrupt_file(&path);
                    return Err(StorageError::Corrupt);
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            debug!("Creating loadout database at {}", path);
            Database::create(path.as_std_path())?
        };

        if let Err(e) = Self::ensure_schema(&db) {
            drop(db);
            if matches!(e, StorageError::Corrupt) {
                let _ = quarantine_corrupt_file(&path);
            }
            return Err(e);
        }
        let db = Arc::new(db);
        cache.insert(path, db.clone());
        Ok(db)
    }

    fn ensure_schema(db: &Database) -> Result<(), StorageError> {
        let write_tx = db.begin_write()?;
        {
            let mut meta = write_tx.open_table(META)?;
            let format: Option<String> = meta.get(META_FORMAT_KEY)?.map(|g| g.value().to_string());
            if format.is_none() {
                let schema_version = CURRENT_SCHEMA.to_string();
                let created_at = Utc::now().to_rfc3339();
                meta.insert(META_FORMAT_KEY, META_FORMAT_VALUE)?;
                meta.insert(META_SCHEMA_VERSION, schema_version.as_str())?;
                meta.insert(META_CREATED_AT, created_at.as_str())?;
            } else if format.as_deref() != Some(META_FORMAT_VALUE) {
                return Err(StorageError::Corrupt);
            }
        }
        let _ = write_tx.open_table(INSTALLS)?;
        let _ = write_tx.open_table(LOADOUTS)?;
        let _ = write_tx.open_table(DISK_STATE)?;
        let _ = write_tx.open_table(APPLIED_STATE)?;
        let _ = write_tx.open_table(PINS)?;
        write_tx.commit()?;

        let read_tx = db.begin_read()?;
        let meta = read_tx.open_table(META)?;
        let schema_version = meta
            .get(META_SCHEMA_VERSION)?
            .and_then(|g| g.value().parse::<u32>().ok())
            .unwrap_or(0);
        if schema_version == 0 {
            return Err(StorageError::Corrupt);
        }
        if schema_version > CURRENT_SCHEMA {
            return Err(StorageError::NewerSchema {
                found: schema_version,
                supported: CURRENT_SCHEMA,
            });
        }
        if schema_version != CURRENT_SCHEMA {
            return Err(StorageError::Corrupt);
        }
        Ok(())
    }

    fn read_state(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        install: GameInstallId,
    ) -> Result<Vec<DiskStateEntry>, StorageError> {
        let db = self.open()?;
        let read_tx = db.begin_read()?;
        let table = read_tx.open_table(table)?;
        let (start, end) = StateKey::range_for_install(&install);

        let mut out: Vec<DiskStateEntry> = Vec::new();
        for row in table.range(start.as_slice()..end.as_slice())? {
            let (_, v) = row?;
            out.push(decode(v.value())?);
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }
}

fn range_keys<V: redb::Value + 'static>(
    table: &ByteTable<'_, V>,
    install: &GameInstallId,
) -> Result<Vec<Vec<u8>>, StorageError> {
    let (start, end) = StateKey::range_for_install(install);
    let mut keys = Vec::new();
    for row in table.range(start.as_slice()..end.as_slice())? {
        let (k, _) = row?;
        keys.push(k.value().to_vec());
    }
    Ok(keys)
}

fn clear_install<V: redb::Value + 'static>(
    table: &mut ByteTable<'_, V>,
    install: &GameInstallId,
) -> Result<usize, StorageError> {
    let keys = range_keys(table, install)?;
    for k in &keys {
        let _ = table.remove(k.as_slice())?;
    }
    Ok(keys.len())
}

fn hash_from_pin_key(key: &[u8]) -> Result<Hash, StorageError> {
    StateKey::suffix_of(key)
        .and_then(|hex| hex.parse().ok())
        .ok_or_else(|| StorageError::MalformedKey {
            table: "pins",
            key: String::from_utf8_lossy(key).into_owned(),
        })
}

impl LoadoutDataStore for RedbLoadoutDataStore {
    fn validate(&self) -> Result<DbState, StorageError> {
        let path = Self::path_for_root(&self.root);
        if !path.exists() {
            return Ok(DbState::Missing);
        }
        {
            let mut cache = Self::db_cache().lock().map_err(|_| StorageError::Poisoned)?;
            if cache.contains_key(&path) {
                if !path.exists() {
                    cache.remove(&path);
                    return Ok(DbState::Missing);
                }
                return Ok(DbState::Valid);
            }
        }

        match Database::open(path.as_std_path()) {
            Ok(db) => match Self::ensure_schema(&db) {
                Ok(()) => Ok(DbState::Valid),
                Err(StorageError::NewerSchema { found, supported }) => {
                    Ok(DbState::NewerSchema { found, supported })
                }
                Err(StorageError::DatabaseAlreadyOpen) => Ok(DbState::Busy),
                Err(StorageError::Corrupt) => {
                    drop(db);
                    let _ = quarantine_corrupt_file(&path);
                    Ok(DbState::Corrupt)
                }
                Err(e) => Err(e),
            },
            Err(redb::DatabaseError::DatabaseAlreadyOpen) => Ok(DbState::Busy),
            Err(e) if Self::is_corrupt_open_error(&e) => {
                let _ = quarantine_corrupt_file(&path);
                Ok(DbState::Corrupt)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_install(&self, id: GameInstallId) -> Result<Option<GameInstallMetadata>, StorageError> {
        let db = self.open()?;
        let read_tx = db.begin_read()?;
        let table = read_tx.open_table(INSTALLS)?;
        let key = id.to_string();
        let guard = table.get(key.as_str())?;
        guard.map(|g| decode(g.value())).transpose()
    }

    fn list_installs(&self) -> Result<Vec<GameInstallMetadata>, StorageError> {
        let db = self.open()?;
        let read_tx = db.begin_read()?;
        let table = read_tx.open_table(INSTALLS)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (_, v) = row?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    fn get_loadout(&self, id: LoadoutId) -> Result<Option<Loadout>, StorageError> {
        let db = self.open()?;
        let read_tx = db.begin_read()?;
        let table = read_tx.open_table(LOADOUTS)?;
        let key = id.to_string();
        let guard = table.get(key.as_str())?;
        guard.map(|g| decode(g.value())).transpose()
    }

    fn list_loadouts(&self, install: GameInstallId) -> Result<Vec<Loadout>, StorageError> {
        let db = self.open()?;
        let read_tx = db.begin_read()?;
        let table = read_tx.open_table(LOADOUTS)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (_, v) = row?;
            let loadout: Loadout = decode(v.value())?;
            if loadout.installation == install {
                out.push(loadout);
            }
        }
        out.sort_by(|a, b| a.short_name.cmp(&b.short_name));
        Ok(out)
    }

    fn disk_state(&self, install: GameInstallId) -> Result<Vec<DiskStateEntry>, StorageError> {
        self.read_state(DISK_STATE, install)
    }

    fn applied_state(&self, install: GameInstallId) -> Result<Vec<DiskStateEntry>, StorageError> {
        self.read_state(APPLIED_STATE, install)
    }

    fn pinned_hashes(&self, install: Option<GameInstallId>) -> Result<HashSet<Hash>, StorageError> {
        let db = self.open()?;
        let read_tx = db.begin_read()?;
        let table = read_tx.open_table(PINS)?;
        let mut out = HashSet::new();
        match install {
            Some(install) => {
                let (start, end) = StateKey::range_for_install(&install);
                for row in table.range(start.as_slice()..end.as_slice())? {
                    let (k, _) = row?;
                    out.insert(hash_from_pin_key(k.value())?);
                }
            }
            None => {
                for row in table.iter()? {
                    let (k, _) = row?;
                    out.insert(hash_from_pin_key(k.value())?);
                }
            }
        }
        Ok(out)
    }

    fn commit(&self, tx: StoreTransaction) -> Result<(), StorageError> {
        if tx.is_empty() {
            return Ok(());
        }
        let db = self.open()?;
        let op_count = tx.len();
        let now = Utc::now().to_rfc3339();

        let write_tx = db.begin_write()?;
        {
            let mut installs = write_tx.open_table(INSTALLS)?;
            let mut loadouts = write_tx.open_table(LOADOUTS)?;
            let mut disk = write_tx.open_table(DISK_STATE)?;
            let mut applied = write_tx.open_table(APPLIED_STATE)?;
            let mut pins = write_tx.open_table(PINS)?;

            for op in tx.ops() {
                match op {
                    StoreOp::PutInstall(install) => {
                        let key = install.id.to_string();
                        installs.insert(key.as_str(), encode(install)?.as_slice())?;
                    }
                    StoreOp::PutLoadout(loadout) => {
                        let key = loadout.id.to_string();
                        loadouts.insert(key.as_str(), encode(loadout)?.as_slice())?;
                    }
                    StoreOp::RemoveLoadout(id) => {
                        let key = id.to_string();
                        let _ = loadouts.remove(key.as_str())?;
                    }
                    StoreOp::PutDiskEntry(install, entry) => {
                        let key = StateKey::for_path(install, &entry.path);
                        disk.insert(key.as_slice(), encode(entry)?.as_slice())?;
                    }
                    StoreOp::ClearDiskState(install) => {
                        clear_install(&mut disk, install)?;
                    }
                    StoreOp::SnapshotApplied(install) => {
                        clear_install(&mut applied, install)?;
                        let (start, end) = StateKey::range_for_install(install);
                        let mut rows = Vec::new();
                        for row in disk.range(start.as_slice()..end.as_slice())? {
                            let (k, v) = row?;
                            rows.push((k.value().to_vec(), v.value().to_vec()));
                        }
                        for (k, v) in rows {
                            applied.insert(k.as_slice(), v.as_slice())?;
                        }
                    }
                    StoreOp::ClearApplied(install) => {
                        clear_install(&mut applied, install)?;
                    }
                    StoreOp::Pin(install, hash) => {
                        let key = StateKey::for_hash(install, hash);
                        pins.insert(key.as_slice(), now.as_str())?;
                    }
                    StoreOp::ClearPins(install) => {
                        clear_install(&mut pins, install)?;
                    }
                }
            }

            let mut meta = write_tx.open_table(META)?;
            meta.insert(META_LAST_COMMIT_AT, now.as_str())?;
        }
        write_tx.commit()?;
        debug!("Committed {} staged operations", op_count);
        Ok(())
    }
}
