//! Identity resolution and the derived relationship graph.
//!
//! The registry hands out cached [`ModelHandle`]s and answers every question
//! about how installed models relate to each other and to the catalog. No
//! relationship is stored: each query is derived from the handles' scan
//! records plus the catalog snapshots under `database/`.
//!
//! ```text
//! scan(handle)
//!   ├── scan_database   hash → cached snapshot with a matching file
//!   ├── scan_catalog    hash → version by hash → model snapshot
//!   ├── companion guard drop the link of a miscategorized companion
//!   └── regenerate      reports + companion links of related models
//! ```

use super::filename::Filename;
use super::handle::ModelHandle;
use super::hashing::{compute_sha256_async, hashes_match};
use super::scan_store::{ScanRecord, ScanStore};
use super::sources::ModelSources;
use super::types::{CompanionState, ModelKey, ModelStatus, ModelType, ScanState};
use crate::catalog::{CatalogApi, CatalogFile, CatalogModel, CatalogVersion};
use crate::config::{ImageConfig, LibraryLayout, Settings};
use crate::error::{Result, ShelfError};
use crate::metadata::JsonCache;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Catalog records a linked handle resolves to.
#[derive(Debug, Clone)]
pub struct CatalogLink {
    pub model: CatalogModel,
    pub version: CatalogVersion,
    pub file: CatalogFile,
}

impl CatalogLink {
    /// The installed file belongs to the catalog's latest version.
    pub fn is_latest(&self) -> bool {
        self.model.latest_version().map(|v| v.id) == Some(self.version.id)
    }
}

/// Outcome of a batch scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned: usize,
    pub linked: usize,
    pub failed: usize,
}

/// Registry of installed models.
pub struct ModelRegistry {
    pub(super) layout: LibraryLayout,
    pub(super) settings: Settings,
    pub(super) sources: ModelSources,
    pub(super) scans: ScanStore,
    pub(super) json: Arc<JsonCache>,
    pub(super) catalog: Arc<dyn CatalogApi>,
    handles: Mutex<HashMap<ModelKey, Arc<ModelHandle>>>,
}

impl ModelRegistry {
    pub fn new(
        layout: LibraryLayout,
        settings: Settings,
        sources: ModelSources,
        json: Arc<JsonCache>,
        catalog: Arc<dyn CatalogApi>,
    ) -> Self {
        let scans = ScanStore::new(layout.scanned_file(), json.clone());
        Self {
            layout,
            settings,
            sources,
            scans,
            json,
            catalog,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sources(&self) -> &ModelSources {
        &self.sources
    }

    pub fn scan_store(&self) -> &ScanStore {
        &self.scans
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogApi> {
        &self.catalog
    }

    pub(super) fn cache(&self) -> MutexGuard<'_, HashMap<ModelKey, Arc<ModelHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================
    // Handle lookup
    // ========================================

    /// Handle for an installed model, created on first lookup.
    ///
    /// Returns `ModelNotFound` if no file with that name is installed.
    pub fn get(&self, model_type: ModelType, filename: &Filename) -> Result<Arc<ModelHandle>> {
        let key = ModelKey::new(model_type, filename.clone());
        if let Some(handle) = self.cache().get(&key) {
            return Ok(handle.clone());
        }

        if self.sources.find_file(model_type, filename).is_none() {
            return Err(ShelfError::ModelNotFound {
                key: key.to_string(),
            });
        }
        let scan = self.scans.get(&key)?;

        let mut cache = self.cache();
        let handle = cache
            .entry(key)
            .or_insert_with(|| Arc::new(ModelHandle::new(model_type, filename.clone(), scan)))
            .clone();
        Ok(handle)
    }

    /// Handles for every installed model of a type.
    pub fn by_type(&self, model_type: ModelType) -> Vec<Arc<ModelHandle>> {
        self.sources
            .filenames(model_type)
            .iter()
            .filter_map(|filename| match self.get(model_type, filename) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    debug!("Skipping {}: {}", filename, e);
                    None
                }
            })
            .collect()
    }

    /// Handles for every installed model.
    pub fn all(&self) -> Vec<Arc<ModelHandle>> {
        ModelType::ALL
            .into_iter()
            .flat_map(|model_type| self.by_type(model_type))
            .collect()
    }

    /// Drop every cached handle.
    pub fn clear_cache(&self) {
        self.cache().clear();
        debug!("Cleared model cache");
    }

    pub fn cached_count(&self) -> usize {
        self.cache().len()
    }

    /// Store keys of every installed model.
    pub fn installed_keys(&self) -> HashSet<String> {
        ModelType::ALL
            .into_iter()
            .flat_map(|model_type| {
                self.sources
                    .filenames(model_type)
                    .into_iter()
                    .map(move |filename| ModelKey::new(model_type, filename).to_string())
            })
            .collect()
    }

    /// Remove scan records of models that are no longer installed.
    pub fn purge_scans(&self) -> Result<usize> {
        self.scans.purge(&self.installed_keys())
    }

    // ========================================
    // Paths
    // ========================================

    /// Path of the installed model file.
    pub fn file_path(&self, handle: &ModelHandle) -> Result<PathBuf> {
        handle.ensure_live()?;
        let filename = handle.filename();
        self.sources
            .find_file(handle.model_type(), &filename)
            .ok_or_else(|| {
                ShelfError::FileNotFound(self.default_directory(handle.model_type()).join(filename.as_str()))
            })
    }

    pub(super) fn default_directory(&self, model_type: ModelType) -> PathBuf {
        self.sources
            .default_directory(model_type)
            .unwrap_or_else(|| self.layout.default_directory(model_type))
    }

    /// Directory holding the model's preview, report and companion link.
    pub fn sidecar_dir(&self, handle: &ModelHandle) -> PathBuf {
        self.file_path(handle)
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| self.default_directory(handle.model_type()))
    }

    pub fn preview_file(&self, handle: &ModelHandle) -> PathBuf {
        self.sidecar_dir(handle)
            .join(format!("{}{}", handle.name(), ImageConfig::PREVIEW_SUFFIX))
    }

    pub fn report_file(&self, handle: &ModelHandle) -> PathBuf {
        self.sidecar_dir(handle).join(format!("{}.md", handle.name()))
    }

    /// Local catalog snapshot file for a remote model id.
    pub fn snapshot_file(&self, model_id: u64) -> PathBuf {
        self.layout.database_dir().join(format!("{}.json", model_id))
    }

    /// Size of the installed file in bytes.
    pub fn size(&self, handle: &ModelHandle) -> Result<u64> {
        let path = self.file_path(handle)?;
        Ok(std::fs::metadata(&path)
            .map_err(|e| ShelfError::io_with_path(e, &path))?
            .len())
    }

    // ========================================
    // Catalog linkage
    // ========================================

    /// Cached catalog model for an id. Unreadable snapshots count as absent.
    pub fn load_snapshot(&self, model_id: u64) -> Option<CatalogModel> {
        self.load_snapshot_file(&self.snapshot_file(model_id))
    }

    fn load_snapshot_file(&self, path: &Path) -> Option<CatalogModel> {
        match self.json.load::<CatalogModel>(path) {
            Ok(model) => model,
            Err(e) => {
                warn!("Ignoring unreadable catalog snapshot {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Catalog model, version and file of a linked handle.
    ///
    /// `None` when unlinked, when the snapshot is missing, or when no version
    /// lists the handle's hash.
    pub fn link(&self, handle: &ModelHandle) -> Option<CatalogLink> {
        let model_id = handle.remote_model_id()?;
        let hash = handle.content_hash()?;
        let model = self.load_snapshot(model_id)?;
        let version = model.version_with_hash(&hash)?.clone();
        let file = version.file_with_hash(&hash)?.clone();
        Some(CatalogLink {
            model,
            version,
            file,
        })
    }

    pub fn catalog_model(&self, handle: &ModelHandle) -> Option<CatalogModel> {
        handle.remote_model_id().and_then(|id| self.load_snapshot(id))
    }

    /// The installed file is the primary file of its version. Unlinked
    /// models count as primary.
    pub fn is_primary(&self, handle: &ModelHandle) -> bool {
        self.link(handle).map(|l| l.file.primary).unwrap_or(true)
    }

    /// The installed file is an optional companion (VAE) of a version.
    pub fn is_companion(&self, handle: &ModelHandle) -> bool {
        match self.link(handle) {
            Some(link) => link.file.is_companion(),
            None => handle.model_type().is_companion_type(),
        }
    }

    /// Unlinked models count as latest.
    pub fn is_latest(&self, handle: &ModelHandle) -> bool {
        self.link(handle).map(|l| l.is_latest()).unwrap_or(true)
    }

    /// Linked, and no installed non-companion sibling is on the latest
    /// version.
    pub fn is_updatable(&self, handle: &ModelHandle) -> bool {
        if !handle.in_catalog() {
            return false;
        }
        !self
            .installed_by_model(handle)
            .iter()
            .any(|m| self.is_latest(m) && !self.is_companion(m))
    }

    pub fn tags(&self, handle: &ModelHandle) -> Vec<String> {
        self.catalog_model(handle).map(|m| m.tags).unwrap_or_default()
    }

    /// Trigger words. An embedding is triggered by its own name.
    pub fn trigger_words(&self, handle: &ModelHandle) -> Vec<String> {
        if handle.model_type() == ModelType::Embedding {
            return vec![handle.name()];
        }
        self.link(handle)
            .map(|l| l.version.trained_words)
            .unwrap_or_default()
    }

    // ========================================
    // Relationships
    // ========================================

    fn installed_with_hashes(&self, hashes: HashSet<String>) -> Vec<Arc<ModelHandle>> {
        if hashes.is_empty() {
            return Vec::new();
        }
        self.all()
            .into_iter()
            .filter(|m| {
                m.content_hash()
                    .is_some_and(|h| hashes.contains(&h.to_ascii_uppercase()))
            })
            .collect()
    }

    /// Installed models whose file belongs to the same catalog model.
    pub fn installed_by_model(&self, handle: &ModelHandle) -> Vec<Arc<ModelHandle>> {
        let Some(model) = self.link(handle).map(|l| l.model) else {
            return Vec::new();
        };
        let hashes = model
            .model_versions
            .iter()
            .flat_map(|v| v.files.iter())
            .filter_map(|f| f.sha256().map(str::to_ascii_uppercase))
            .collect();
        self.installed_with_hashes(hashes)
    }

    /// Installed models whose file belongs to the same catalog version.
    pub fn installed_by_version(&self, handle: &ModelHandle) -> Vec<Arc<ModelHandle>> {
        let Some(version) = self.link(handle).map(|l| l.version) else {
            return Vec::new();
        };
        let hashes = version
            .files
            .iter()
            .filter_map(|f| f.sha256().map(str::to_ascii_uppercase))
            .collect();
        self.installed_with_hashes(hashes)
    }

    /// Companion file the handle's version declares, if any.
    pub fn companion_file(&self, handle: &ModelHandle) -> Option<CatalogFile> {
        self.link(handle)
            .and_then(|l| l.version.companion_file().cloned())
    }

    /// Installed companion of this model.
    pub fn companion_of(&self, handle: &ModelHandle) -> Option<Arc<ModelHandle>> {
        let file = self.companion_file(handle)?;
        let hash = file.sha256()?;
        self.installed_by_version(handle).into_iter().find(|m| {
            m.content_hash()
                .is_some_and(|h| hashes_match(&h, hash))
        })
    }

    /// Version declares a companion that is not installed.
    pub fn companion_missing(&self, handle: &ModelHandle) -> bool {
        self.companion_file(handle).is_some() && self.companion_of(handle).is_none()
    }

    /// Models that declare this companion-type model as their companion.
    pub fn included_by(&self, handle: &ModelHandle) -> Vec<Arc<ModelHandle>> {
        if !handle.model_type().is_companion_type() {
            return Vec::new();
        }
        let Some(hash) = handle.content_hash() else {
            return Vec::new();
        };
        self.all()
            .into_iter()
            .filter(|m| {
                self.companion_file(m)
                    .and_then(|f| f.sha256().map(|h| hashes_match(h, &hash)))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Listing status, e.g. `Outdated -V`.
    pub fn status(&self, handle: &ModelHandle) -> Result<ModelStatus> {
        handle.ensure_live()?;

        let scan = if !handle.has_scan() {
            ScanState::NotScanned
        } else if !handle.in_catalog() {
            ScanState::Scanned
        } else if self.is_updatable(handle) {
            ScanState::Outdated
        } else if !self.is_latest(handle) {
            ScanState::Previous
        } else {
            ScanState::Latest
        };

        let included = !self.included_by(handle).is_empty();
        let companion = if included || self.companion_file(handle).is_none() {
            CompanionState::None
        } else if self.companion_of(handle).is_some() {
            CompanionState::Present
        } else {
            CompanionState::Missing
        };

        Ok(ModelStatus {
            scan,
            included,
            companion,
        })
    }

    // ========================================
    // Scanning
    // ========================================

    /// Resolve a handle against the local snapshots and the catalog, then
    /// refresh every related model's report and companion link.
    ///
    /// Without `update`, a handle that already has a scan record and a
    /// snapshot makes no network request.
    pub async fn scan(&self, handle: &Arc<ModelHandle>, update: bool) -> Result<()> {
        handle.ensure_live()?;
        info!("Scanning model {}...", handle.name());

        if !handle.has_scan() {
            self.scan_database(handle).await?;
        }

        let snapshot_missing = handle
            .remote_model_id()
            .is_some_and(|id| !self.snapshot_file(id).exists());
        if !handle.has_scan() || snapshot_missing || update {
            self.scan_catalog(handle).await?;
        }

        self.guard_companion_type(handle)?;
        self.regenerate_related(handle, true)
    }

    /// Scan every installed model. Each model is committed on its own; a
    /// failure is logged and counted, never rolled back or propagated.
    pub async fn scan_all(&self, update: bool) -> ScanSummary {
        let mut summary = ScanSummary::default();
        for handle in self.all() {
            match self.scan(&handle, update).await {
                Ok(()) => {
                    summary.scanned += 1;
                    if handle.in_catalog() {
                        summary.linked += 1;
                    }
                }
                Err(e) => {
                    error!("Failed to scan {}: {}", handle.key(), e);
                    summary.failed += 1;
                }
            }
        }
        info!(
            "Scanned {} models ({} linked, {} failed)",
            summary.scanned, summary.linked, summary.failed
        );
        summary
    }

    async fn ensure_hash(&self, handle: &ModelHandle) -> Result<String> {
        if let Some(hash) = handle.content_hash() {
            return Ok(hash);
        }
        let path = self.file_path(handle)?;
        let hash = compute_sha256_async(&path).await?;
        debug!("Hashed {}: {}", handle.key(), hash);
        handle.set_pending_hash(hash.clone());
        Ok(hash)
    }

    /// Look for the hash in every cached catalog snapshot. Persists a record
    /// only on a match.
    async fn scan_database(&self, handle: &ModelHandle) -> Result<()> {
        let hash = self.ensure_hash(handle).await?;
        if let Some(model_id) = self.find_in_snapshots(&hash) {
            info!("Found {} in local catalog cache [{}]", handle.name(), model_id);
            self.save_scan(handle, Some(model_id), hash)?;
        }
        Ok(())
    }

    fn find_in_snapshots(&self, hash: &str) -> Option<u64> {
        let entries = std::fs::read_dir(self.layout.database_dir()).ok()?;
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| self.load_snapshot_file(&p))
            .find(|model| model.contains_hash(hash))
            .map(|model| model.id)
    }

    async fn scan_catalog(&self, handle: &ModelHandle) -> Result<()> {
        let hash = self.ensure_hash(handle).await?;

        if handle.remote_model_id().is_none() {
            match self.catalog.version_by_hash(&hash).await {
                Some(version) => self.save_scan(handle, Some(version.model_id), hash)?,
                None => {
                    debug!("No catalog match for {}", handle.key());
                    return self.save_scan(handle, None, hash);
                }
            }
        }

        let Some(model_id) = handle.remote_model_id() else {
            return Ok(());
        };
        if let Some(snapshot) = self.catalog.model(model_id).await {
            self.json.store(&self.snapshot_file(model_id), &snapshot.raw)?;
            info!("Stored catalog snapshot for {} [{}]", snapshot.model.name, model_id);
        }
        Ok(())
    }

    pub(super) fn save_scan(
        &self,
        handle: &ModelHandle,
        remote_model_id: Option<u64>,
        hash: String,
    ) -> Result<()> {
        let record = ScanRecord::new(remote_model_id, Some(hash));
        self.scans.put(&handle.key(), record.clone())?;
        handle.set_scan(record);
        Ok(())
    }

    /// A companion file may be filed under a different type in the catalog
    /// than locally. Such a link is dropped instead of adopting the parent
    /// model's identity.
    fn guard_companion_type(&self, handle: &ModelHandle) -> Result<()> {
        let Some(link) = self.link(handle) else {
            return Ok(());
        };
        if link.file.is_companion() && link.model.model_type() != Some(handle.model_type()) {
            warn!(
                "Model {} has a type mismatch with the catalog ({}), unlinking",
                handle.filename(),
                link.model.kind
            );
            let hash = handle.content_hash().unwrap_or_default();
            self.save_scan(handle, None, hash)?;
        }
        Ok(())
    }

    /// Rebuild reports and companion links around a handle.
    pub fn regenerate_related(&self, handle: &Arc<ModelHandle>, include_self: bool) -> Result<()> {
        if include_self {
            self.generate_report(handle)?;
            self.link_companion(handle)?;
        }

        for sibling in self.installed_by_model(handle) {
            if Arc::ptr_eq(&sibling, handle) {
                continue;
            }
            if let Err(e) = self.generate_report(&sibling) {
                warn!("Failed to refresh report for {}: {}", sibling.key(), e);
            }
        }

        for parent in self.included_by(handle) {
            if let Err(e) = self
                .generate_report(&parent)
                .and_then(|_| self.link_companion(&parent))
            {
                warn!("Failed to refresh {}: {}", parent.key(), e);
            }
        }
        Ok(())
    }
}
