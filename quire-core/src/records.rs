//! Publish record stores.
//!
//! One [`PublishRecord`] per previously published item, keyed by its local
//! path. [`JsonRecordStore`] persists the whole map as a single JSON
//! document at `<root>/.quire/records.json`; every mutation rewrites it
//! with the `.tmp` + rename pattern so a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{store_io_err, StoreError};
use crate::types::PublishRecord;

/// Records keyed by local path.
pub type RecordMap = BTreeMap<String, PublishRecord>;

/// Storage for publish records.
///
/// Methods take `&self`; implementations synchronise internally so one
/// store can be shared between the status engine and the publisher.
pub trait RecordStore: Send + Sync {
    fn get_all(&self) -> Result<RecordMap, StoreError>;

    fn get(&self, key: &str) -> Result<Option<PublishRecord>, StoreError> {
        Ok(self.get_all()?.remove(key))
    }

    fn upsert(&self, key: &str, record: PublishRecord) -> Result<(), StoreError>;

    /// Returns the removed record, if there was one.
    fn remove(&self, key: &str) -> Result<Option<PublishRecord>, StoreError>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// On-disk payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordFile {
    pub updated_at: DateTime<Utc>,
    pub records: RecordMap,
}

/// File-backed store. The file is read once on open and kept in memory.
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    records: Mutex<RecordMap>,
}

impl JsonRecordStore {
    /// Open the store at `path`; an absent file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = load_file(&path)?.records;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Open `<root>/.quire/records.json`.
    pub fn open_at(root: &Path) -> Result<Self, StoreError> {
        Self::open(crate::config::records_path_at(root))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, RecordMap>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Apply `mutate` to a copy, persist it, then swap it in. A failed save
    /// leaves the in-memory map untouched.
    fn mutate<T>(&self, mutate: impl FnOnce(&mut RecordMap) -> T) -> Result<T, StoreError> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let out = mutate(&mut next);
        save_file(
            &self.path,
            &RecordFile {
                updated_at: Utc::now(),
                records: next.clone(),
            },
        )?;
        *guard = next;
        Ok(out)
    }
}

impl RecordStore for JsonRecordStore {
    fn get_all(&self) -> Result<RecordMap, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn get(&self, key: &str) -> Result<Option<PublishRecord>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn upsert(&self, key: &str, record: PublishRecord) -> Result<(), StoreError> {
        self.mutate(|records| {
            records.insert(key.to_string(), record);
        })
    }

    fn remove(&self, key: &str) -> Result<Option<PublishRecord>, StoreError> {
        if !self.lock()?.contains_key(key) {
            return Ok(None);
        }
        self.mutate(|records| records.remove(key))
    }
}

/// Load a record file; returns an empty payload if it does not exist.
pub fn load_file(path: &Path) -> Result<RecordFile, StoreError> {
    if !path.exists() {
        return Ok(RecordFile {
            updated_at: Utc::now(),
            records: BTreeMap::new(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| store_io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save a record file atomically (`<path>.tmp` → rename).
pub fn save_file(path: &Path, file: &RecordFile) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(store_io_err(
            path,
            std::io::Error::other("invalid record store path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| store_io_err(dir, e))?;

    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| store_io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(store_io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<RecordMap>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PublishRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.local_path.clone(), r))
            .collect();
        Self {
            records: Mutex::new(map),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RecordMap>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_all(&self) -> Result<RecordMap, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn get(&self, key: &str) -> Result<Option<PublishRecord>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn upsert(&self, key: &str, record: PublishRecord) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), record);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<PublishRecord>, StoreError> {
        Ok(self.lock()?.remove(key))
    }
}
