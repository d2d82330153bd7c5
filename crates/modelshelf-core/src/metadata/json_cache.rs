//! Read-through cache of JSON documents keyed by file path.
//!
//! The scan store and the catalog snapshot directory are read far more often
//! than they are written, so documents are parsed once and kept as
//! `serde_json::Value` until the file is rewritten through the cache.

use super::{atomic_read_json, atomic_write_json};
use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Process-wide JSON document cache, owned by the shelf context.
#[derive(Debug, Default)]
pub struct JsonCache {
    documents: Mutex<HashMap<PathBuf, Value>>,
}

impl JsonCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<PathBuf, Value>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the raw document at `path`, reading the file only on a miss.
    ///
    /// Returns `None` when the file does not exist.
    pub fn load_value(&self, path: &Path) -> Result<Option<Value>> {
        if let Some(value) = self.documents().get(path) {
            return Ok(Some(value.clone()));
        }

        let Some(value) = atomic_read_json::<Value>(path)? else {
            return Ok(None);
        };
        self.documents().insert(path.to_path_buf(), value.clone());
        Ok(Some(value))
    }

    /// Load and deserialize the document at `path`.
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match self.load_value(path)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Atomically write `data` to `path` and refresh the cached copy.
    pub fn store<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        atomic_write_json(path, &value)?;
        self.documents().insert(path.to_path_buf(), value);
        Ok(())
    }

    /// Forget every cached document.
    pub fn clear(&self) {
        self.documents().clear();
        debug!("Cleared JSON document cache");
    }

    /// Number of cached documents.
    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
