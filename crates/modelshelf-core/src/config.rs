//! Centralized configuration for the model shelf.
//!
//! Constants live in small namespace structs; user-tunable values live in
//! [`Settings`], which is persisted as JSON next to the scan store.

use crate::error::Result;
use crate::metadata::{atomic_read_json, atomic_write_json};
use crate::model_library::ModelType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Model Shelf";
    pub const USER_AGENT: &'static str = "modelshelf/0.3";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const CATALOG_API_BASE: &'static str = "https://civitai.com/api/v1";
    pub const CATALOG_WEB_BASE: &'static str = "https://civitai.com/models";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);
    pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;
    pub const THROUGHPUT_WINDOW: usize = 10;
    pub const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(200);
    pub const DOWNLOAD_TEMP_PREFIX: &'static str = ".modelshelf-";
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
}

/// Shared directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const IMAGES_DIR_NAME: &'static str = "images";
    pub const DATABASE_DIR_NAME: &'static str = "database";
    pub const SCANNED_FILE_NAME: &'static str = "scanned.json";
    pub const SETTINGS_FILE_NAME: &'static str = "settings.json";
}

/// Image naming rules.
pub struct ImageConfig;

impl ImageConfig {
    /// First index handed out to user-added images. Lower indices are the
    /// ordinal position of the image in its catalog version.
    pub const CUSTOM_INDEX_START: u32 = 1000;
    pub const PREVIEW_SUFFIX: &'static str = ".preview.png";
    pub const INDEX_SEPARATOR: char = '.';
    pub const EXTENSION: &'static str = ".png";
}

/// User-tunable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Enable debug logging.
    pub debug_mode: bool,
    /// Skip NSFW-classified catalog images when picking previews.
    pub hide_nsfw_images: bool,
    /// Create companion (VAE) symlinks next to models that declare one.
    pub create_vae_symlinks: bool,
    /// List every catalog version in reports, not only installed ones.
    pub all_versions_in_report: bool,
    /// Keep the catalog's default width limit on image URLs.
    pub image_width_limit: bool,
    /// Queue catalog images together with model downloads.
    pub auto_image_download: bool,
    /// Delay after every catalog request, in seconds.
    pub request_delay_secs: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_mode: false,
            hide_nsfw_images: true,
            create_vae_symlinks: true,
            all_versions_in_report: true,
            image_width_limit: true,
            auto_image_download: true,
            request_delay_secs: NetworkConfig::DEFAULT_REQUEST_DELAY.as_secs_f64(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(atomic_read_json(path)?.unwrap_or_default())
    }

    /// Persist settings atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }

    /// Catalog request delay as a duration. Negative values clamp to zero.
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_secs.max(0.0))
    }
}

/// Filesystem layout of a shelf rooted at one directory.
///
/// ```text
/// root/
///   models/Stable-diffusion/   checkpoints (+ .preview.png, .md, .vae.* links)
///   models/Lora/ ...           one default directory per model type
///   embeddings/
///   images/                    {TYPE}_{name}.{index}.png
///   database/                  {catalog model id}.json snapshots
///   scanned.json               scan store
///   settings.json
/// ```
#[derive(Debug, Clone)]
pub struct LibraryLayout {
    root: PathBuf,
    extra_dirs: HashMap<ModelType, Vec<PathBuf>>,
}

impl LibraryLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extra_dirs: HashMap::new(),
        }
    }

    /// Register an additional directory searched for models of one type.
    pub fn with_extra_dir(mut self, model_type: ModelType, dir: impl Into<PathBuf>) -> Self {
        self.extra_dirs.entry(model_type).or_default().push(dir.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::IMAGES_DIR_NAME)
    }

    pub fn database_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::DATABASE_DIR_NAME)
    }

    pub fn scanned_file(&self) -> PathBuf {
        self.root.join(PathsConfig::SCANNED_FILE_NAME)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(PathsConfig::SETTINGS_FILE_NAME)
    }

    /// Default installation directory for a model type.
    pub fn default_directory(&self, model_type: ModelType) -> PathBuf {
        self.root.join(model_type.default_subdir())
    }

    /// All directories searched for a model type, default first, without
    /// duplicates. Directories that do not exist are skipped.
    pub fn directories(&self, model_type: ModelType) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        let candidates = std::iter::once(self.default_directory(model_type)).chain(
            self.extra_dirs
                .get(&model_type)
                .cloned()
                .unwrap_or_default(),
        );

        for dir in candidates {
            if !dir.is_dir() {
                continue;
            }
            let canonical = dir.canonicalize().unwrap_or_else(|_| dir.clone());
            let seen = dirs
                .iter()
                .any(|d| d.canonicalize().unwrap_or_else(|_| d.clone()) == canonical);
            if !seen {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// Create every default directory if missing.
    pub fn create_directories(&self) -> Result<()> {
        let mut dirs = vec![self.images_dir(), self.database_dir()];
        dirs.extend(ModelType::ALL.iter().map(|t| self.default_directory(*t)));

        for dir in dirs {
            std::fs::create_dir_all(&dir)
                .map_err(|e| crate::ShelfError::io_with_path(e, &dir))?;
        }
        Ok(())
    }
}
