//! Persisted scan results: `"{TYPE}/{filename}"` → catalog identity.
//!
//! The whole table is one JSON document written atomically, read through the
//! shared [`JsonCache`]. Read-modify-write cycles are serialized by an
//! internal lock so two handles scanning at once cannot drop each other's
//! records.

use super::types::ModelKey;
use crate::error::Result;
use crate::metadata::JsonCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Resolved catalog identity of one installed model.
///
/// `remote_model_id == None` with a hash present means the file was scanned
/// and has no catalog match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    #[serde(alias = "model_id")]
    pub remote_model_id: Option<u64>,
    #[serde(alias = "hash")]
    pub content_hash: Option<String>,
}

impl ScanRecord {
    pub fn new(remote_model_id: Option<u64>, content_hash: Option<String>) -> Self {
        Self {
            remote_model_id,
            content_hash,
        }
    }
}

/// Serialized table type, ordered for stable diffs.
pub type ScanTable = BTreeMap<String, ScanRecord>;

/// Scan table backed by `scanned.json`.
pub struct ScanStore {
    path: PathBuf,
    cache: Arc<JsonCache>,
    write_lock: Mutex<()>,
}

impl ScanStore {
    pub fn new(path: impl Into<PathBuf>, cache: Arc<JsonCache>) -> Self {
        Self {
            path: path.into(),
            cache,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full table. A missing document is an empty table.
    pub fn load(&self) -> Result<ScanTable> {
        Ok(self.cache.load(&self.path)?.unwrap_or_default())
    }

    /// Replace the full table atomically.
    pub fn save(&self, table: &ScanTable) -> Result<()> {
        self.cache.store(&self.path, table)
    }

    /// Record for one key, `None` when never scanned.
    pub fn get(&self, key: &ModelKey) -> Result<Option<ScanRecord>> {
        Ok(self.load()?.remove(&key.to_string()))
    }

    /// Insert or replace one record.
    pub fn put(&self, key: &ModelKey, record: ScanRecord) -> Result<()> {
        self.modify(|table| {
            table.insert(key.to_string(), record);
            true
        })?;
        debug!("Saved scan for {}", key);
        Ok(())
    }

    /// Remove one record. Returns whether it existed.
    pub fn remove(&self, key: &ModelKey) -> Result<bool> {
        self.modify(|table| table.remove(&key.to_string()).is_some())
    }

    /// Move a record to a new key. The hash is kept as is.
    pub fn rename_key(&self, from: &ModelKey, to: &ModelKey) -> Result<bool> {
        self.modify(|table| match table.remove(&from.to_string()) {
            Some(record) => {
                table.insert(to.to_string(), record);
                true
            }
            None => false,
        })
    }

    /// Drop records whose key is not in `installed`. Returns how many were
    /// removed.
    pub fn purge(&self, installed: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        self.modify(|table| {
            let before = table.len();
            table.retain(|key, _| installed.contains(key));
            removed = before - table.len();
            removed > 0
        })?;
        if removed > 0 {
            info!("Purged {} stale scan records", removed);
        }
        Ok(removed)
    }

    /// Apply `f` under the write lock; save only when it reports a change.
    fn modify(&self, f: impl FnOnce(&mut ScanTable) -> bool) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = self.load()?;
        let changed = f(&mut table);
        if changed {
            self.save(&table)?;
        }
        Ok(changed)
    }
}
