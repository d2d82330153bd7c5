//! Model Shelf Core - Headless library for catalog-linked local model
//! collections.
//!
//! Installed model files are matched to a remote catalog by content hash.
//! From that link the library derives how models relate to each other
//! (versions of one model, companion VAEs), keeps reports, previews and
//! companion symlinks next to each file, and downloads new files in the
//! background.
//!
//! # Example
//!
//! ```rust,ignore
//! use modelshelf_core::{Filename, ModelShelf, ModelType};
//!
//! #[tokio::main]
//! async fn main() -> modelshelf_core::Result<()> {
//!     let shelf = ModelShelf::builder("/path/to/webui").build()?;
//!     let registry = shelf.registry();
//!
//!     let model = registry.get(ModelType::Lora, &Filename::parse("style.safetensors"))?;
//!     registry.scan(&model, false).await?;
//!     println!("{}: {}", model.name(), registry.status(&model)?);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod format;
pub mod metadata;
pub mod model_library;
pub mod network;
pub mod platform;
pub mod transfer;

mod api;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use catalog::{CatalogApi, CatalogClient, CatalogModel, CatalogSnapshot};
pub use config::{LibraryLayout, Settings};
pub use error::{Result, ShelfError};
pub use model_library::{
    CatalogLink, Filename, ModelHandle, ModelKey, ModelRegistry, ModelSources, ModelStatus,
    ModelType, ScanSummary,
};
pub use transfer::{JobRequest, JobSnapshot, JobStatus, TransferEngine};

// Re-export builder from api module
pub use api::ModelShelfBuilder;

use metadata::JsonCache;
use network::HttpClient;
use std::sync::{Arc, OnceLock};

/// Application context.
///
/// Owns the registry, the JSON document cache and the transfer engine for
/// the lifetime of a process. Nothing is global: every caller gets these
/// through a `ModelShelf`.
pub struct ModelShelf {
    layout: LibraryLayout,
    registry: Arc<ModelRegistry>,
    json: Arc<JsonCache>,
    http: HttpClient,
    transfer: OnceLock<Arc<TransferEngine>>,
}

impl ModelShelf {
    /// Create a builder for ModelShelf.
    pub fn builder(root: impl Into<std::path::PathBuf>) -> ModelShelfBuilder {
        ModelShelfBuilder::new(root)
    }

    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        self.registry.settings()
    }

    pub fn json_cache(&self) -> &Arc<JsonCache> {
        &self.json
    }

    /// The transfer engine, created on first use.
    pub fn transfer(&self) -> &Arc<TransferEngine> {
        self.transfer.get_or_init(|| {
            Arc::new(TransferEngine::new(
                self.http.clone(),
                self.registry.sources().clone(),
                self.layout.clone(),
            ))
        })
    }

    /// Remove scan records of models that are no longer installed.
    pub fn purge_scans(&self) -> Result<usize> {
        self.registry.purge_scans()
    }

    /// Persist settings. They take effect the next time the shelf is opened.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        settings.save(&self.layout.settings_file())
    }

    /// Stop any transfer and drop cached handles and documents.
    pub async fn shutdown(&self) {
        if let Some(engine) = self.transfer.get() {
            engine.stop().await;
        }
        self.registry.clear_cache();
        self.json.clear();
    }
}
