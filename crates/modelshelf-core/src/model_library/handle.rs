//! Live view of one installed model.

use super::filename::Filename;
use super::hashing::short_hash;
use super::scan_store::ScanRecord;
use super::types::{ModelKey, ModelType};
use crate::error::{Result, ShelfError};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct HandleState {
    filename: Filename,
    scan: Option<ScanRecord>,
    /// Hash computed but not persisted yet.
    pending_hash: Option<String>,
    deleted: bool,
}

/// An installed model as seen by the registry.
///
/// Handles are shared (`Arc<ModelHandle>`) and cached per key; two lookups
/// for the same type and filename return the same handle. After a delete the
/// handle stays allocated for whoever still holds it, but every registry
/// operation on it fails with [`ShelfError::HandleDeleted`].
#[derive(Debug)]
pub struct ModelHandle {
    model_type: ModelType,
    state: RwLock<HandleState>,
}

impl ModelHandle {
    pub(crate) fn new(model_type: ModelType, filename: Filename, scan: Option<ScanRecord>) -> Self {
        Self {
            model_type,
            state: RwLock::new(HandleState {
                filename,
                scan,
                pending_hash: None,
                deleted: false,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HandleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HandleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn filename(&self) -> Filename {
        self.read().filename.clone()
    }

    /// Model name, the filename base.
    pub fn name(&self) -> String {
        self.read().filename.base().to_string()
    }

    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.model_type, self.filename())
    }

    /// Base used for this model's images: `{TYPE}_{name}`.
    pub fn image_key(&self) -> String {
        self.model_type.image_key(&self.name())
    }

    pub fn scan_record(&self) -> Option<ScanRecord> {
        self.read().scan.clone()
    }

    pub fn has_scan(&self) -> bool {
        self.read().scan.is_some()
    }

    pub fn remote_model_id(&self) -> Option<u64> {
        self.read().scan.as_ref().and_then(|s| s.remote_model_id)
    }

    /// Persisted hash, or one computed during a scan that found no match.
    pub fn content_hash(&self) -> Option<String> {
        let state = self.read();
        state
            .scan
            .as_ref()
            .and_then(|s| s.content_hash.clone())
            .or_else(|| state.pending_hash.clone())
    }

    /// AutoV2 short hash, empty when the file was never hashed.
    pub fn short_hash(&self) -> String {
        self.content_hash()
            .map(|h| short_hash(&h).to_string())
            .unwrap_or_default()
    }

    /// Linked to a catalog model.
    pub fn in_catalog(&self) -> bool {
        self.remote_model_id().is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.read().deleted
    }

    /// Fail with `HandleDeleted` once the model was deleted.
    pub fn ensure_live(&self) -> Result<()> {
        let state = self.read();
        if state.deleted {
            return Err(ShelfError::HandleDeleted {
                key: ModelKey::new(self.model_type, state.filename.clone()).to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn set_scan(&self, scan: ScanRecord) {
        self.write().scan = Some(scan);
    }

    pub(crate) fn set_pending_hash(&self, hash: String) {
        self.write().pending_hash = Some(hash);
    }

    pub(crate) fn set_filename(&self, filename: Filename) {
        self.write().filename = filename;
    }

    pub(crate) fn mark_deleted(&self) {
        let mut state = self.write();
        state.deleted = true;
        state.scan = None;
        state.pending_hash = None;
    }
}
