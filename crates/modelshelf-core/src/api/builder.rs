//! Builder for configuring ModelShelf initialization.

use crate::catalog::{CatalogApi, CatalogClient};
use crate::config::{AppConfig, LibraryLayout, NetworkConfig, Settings};
use crate::error::{Result, ShelfError};
use crate::metadata::JsonCache;
use crate::model_library::{ModelRegistry, ModelSources, ModelType};
use crate::network::HttpClient;
use crate::ModelShelf;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Builder for a [`ModelShelf`].
///
/// # Example
///
/// ```rust,ignore
/// use modelshelf_core::ModelShelf;
///
/// let shelf = ModelShelf::builder("./webui")
///     .auto_create_dirs(true)
///     .purge_on_start(true)
///     .build()?;
/// ```
pub struct ModelShelfBuilder {
    root: PathBuf,
    extra_dirs: Vec<(ModelType, PathBuf)>,
    catalog_base_url: String,
    settings: Option<Settings>,
    sources: Option<ModelSources>,
    catalog: Option<Arc<dyn CatalogApi>>,
    auto_create_dirs: bool,
    purge_on_start: bool,
}

impl ModelShelfBuilder {
    /// Create a new builder for the shelf rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extra_dirs: Vec::new(),
            catalog_base_url: NetworkConfig::CATALOG_API_BASE.to_string(),
            settings: None,
            sources: None,
            catalog: None,
            auto_create_dirs: false,
            purge_on_start: false,
        }
    }

    /// Also look for models of a type in `dir`.
    pub fn extra_dir(mut self, model_type: ModelType, dir: impl Into<PathBuf>) -> Self {
        self.extra_dirs.push((model_type, dir.into()));
        self
    }

    /// Base URL of the catalog REST API.
    ///
    /// Default: [`NetworkConfig::CATALOG_API_BASE`]
    pub fn catalog_base_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_base_url = url.into();
        self
    }

    /// Use these settings instead of loading `settings.json`.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Use custom installed-model sources instead of scanning the layout's
    /// directories.
    pub fn sources(mut self, sources: ModelSources) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Use a custom catalog implementation. Overrides the base URL.
    pub fn catalog(mut self, catalog: Arc<dyn CatalogApi>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Create the root and every default directory if missing.
    ///
    /// Default: `false` (the root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Drop scan records of models that are no longer installed.
    ///
    /// Default: `false`
    pub fn purge_on_start(mut self, enable: bool) -> Self {
        self.purge_on_start = enable;
        self
    }

    /// Build the ModelShelf instance.
    pub fn build(self) -> Result<ModelShelf> {
        let mut layout = LibraryLayout::new(&self.root);
        for (model_type, dir) in self.extra_dirs {
            layout = layout.with_extra_dir(model_type, dir);
        }

        if self.auto_create_dirs {
            layout.create_directories()?;
        } else if !self.root.exists() {
            return Err(ShelfError::Config {
                message: format!("Library root does not exist: {}", self.root.display()),
            });
        }

        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::load(&layout.settings_file())?,
        };

        let http = HttpClient::new()?;
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => Arc::new(CatalogClient::new(
                http.clone(),
                self.catalog_base_url,
                settings.request_delay(),
            )),
        };
        let sources = self
            .sources
            .unwrap_or_else(|| ModelSources::from_layout(&layout));
        let json = Arc::new(JsonCache::new());

        let registry = Arc::new(ModelRegistry::new(
            layout.clone(),
            settings,
            sources,
            json.clone(),
            catalog,
        ));

        if self.purge_on_start {
            let purged = registry.purge_scans()?;
            if purged > 0 {
                info!("Purged {} stale scan records", purged);
            }
        }

        info!("Opened {} at {}", AppConfig::APP_NAME, layout.root().display());
        Ok(ModelShelf {
            layout,
            registry,
            json,
            http,
            transfer: OnceLock::new(),
        })
    }
}
