//! File-backed secret store.
//!
//! The durable form is a JSON array of `{id, secret, ttl}` objects. A full
//! copy of the parsed file is kept in memory; once populated the cache is the
//! sole answer for reads and is only re-synced from disk by an explicit
//! [`SecretStore::load`] (startup or the operator reload endpoint). That
//! staleness is a deliberate trade-off: lookups never touch the filesystem.
//!
//! Writes go through truncate-and-write. A crash mid-write can leave a
//! zero-length or partial file; the store then comes back unavailable and
//! the operator fixes the file and reloads. A write-temp-then-rename scheme
//! would close that gap; switching to it is a deliberate behavior change,
//! not a drive-by fix.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::models::SecretRecord;

pub const SECRETS_FILE: &str = "secrets.json";

pub struct SecretStore {
    file: PathBuf,
    /// Parsed file contents in persisted order. Small (tens of identities),
    /// so reads scan linearly rather than keeping a second keyed index.
    cache: RwLock<Vec<SecretRecord>>,
    /// True iff the last (re)load read and parsed the file successfully.
    /// Mutating operations refuse to run while this is false.
    available: AtomicBool,
}

impl SecretStore {
    /// Creates the storage directory and an empty `secrets.json` if absent,
    /// then performs the initial load. Directory or file creation failure is
    /// returned as `Io` and is fatal to the caller: there is no degraded mode
    /// without a writable store location. A read/parse failure of an existing
    /// file is NOT fatal; the store starts unavailable instead.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| {
            error!(dir = %dir.display(), %e, "could not create secret storage directory");
            StoreError::Io(e.to_string())
        })?;
        let file = dir.join(SECRETS_FILE);
        if !file.exists() {
            fs::write(&file, "[]").map_err(|e| {
                error!(file = %file.display(), %e, "could not create empty secrets file");
                StoreError::Io(e.to_string())
            })?;
            info!(file = %file.display(), "created empty secrets file");
        }

        let store = Self {
            file,
            cache: RwLock::new(Vec::new()),
            available: AtomicBool::new(false),
        };
        if let Err(e) = store.load() {
            warn!(%e, "initial secrets load failed; store starts unavailable");
        }
        Ok(store)
    }

    /// Re-reads the file, replaces the cache wholesale and updates the
    /// availability flag to the outcome. Safe to call repeatedly.
    pub fn load(&self) -> Result<usize, StoreError> {
        match self.read_records() {
            Ok(records) => {
                let n = records.len();
                *self.cache.write().unwrap() = records;
                self.available.store(true, Ordering::SeqCst);
                info!(identities = n, "loaded secrets file");
                Ok(n)
            }
            Err(e) => {
                self.available.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Read-only health getter; reads may still serve cached data when false.
    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Cache-only lookup. Misses stay misses until the next `load()`.
    pub fn get(&self, id: &str) -> Result<SecretRecord, StoreError> {
        self.cache
            .read()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Appends a new record and rewrites the file. Refuses while unavailable:
    /// an unhealthy store is treated as read-mostly rather than risking a
    /// write against unknown on-disk state.
    pub fn save(&self, id: &str, secret: &str, ttl: u64) -> Result<(), StoreError> {
        if !self.available() {
            return Err(StoreError::Unavailable);
        }

        // Work from current file contents, not the cache, so a concurrent
        // manual edit loses nothing it already persisted.
        let mut records = self.read_records()?;
        if records.iter().any(|r| r.id == id) {
            return Err(StoreError::AlreadyExists);
        }
        records.push(SecretRecord {
            id: id.to_string(),
            secret: secret.to_string(),
            ttl,
        });
        self.write_records(&records)?;
        *self.cache.write().unwrap() = records;
        info!(%id, "saved secret");
        Ok(())
    }

    /// Removes the id. The cache entry goes first so a deleted secret is
    /// never served again even if the file rewrite then fails.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.cache.write().unwrap().retain(|r| r.id != id);

        let mut records = self.read_records()?;
        records.retain(|r| r.id != id);
        self.write_records(&records)?;
        info!(%id, "deleted secret");
        Ok(())
    }

    /// Cached ids in persisted order, as of the last successful load/write.
    pub fn list_ids(&self) -> Vec<String> {
        self.cache.read().unwrap().iter().map(|r| r.id.clone()).collect()
    }

    fn read_records(&self) -> Result<Vec<SecretRecord>, StoreError> {
        let raw = fs::read_to_string(&self.file).map_err(|e| {
            error!(file = %self.file.display(), %e, "failed to read secrets file");
            StoreError::Io(e.to_string())
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            error!(file = %self.file.display(), %e, "failed to parse secrets file");
            StoreError::Parse(e.to_string())
        })
    }

    fn write_records(&self, records: &[SecretRecord]) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(records).map_err(|e| {
            error!(%e, "failed to serialize secrets list");
            StoreError::Parse(e.to_string())
        })?;
        fs::write(&self.file, serialized).map_err(|e| {
            error!(file = %self.file.display(), %e, "failed to overwrite secrets file");
            StoreError::Io(e.to_string())
        })
    }
}
