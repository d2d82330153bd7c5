//! Where installed models are listed from.
//!
//! The registry never walks directories itself. It asks an
//! [`InstalledModels`] provider per type; a type without a provider simply
//! has no installed models.

use super::filename::Filename;
use super::types::ModelType;
use crate::config::LibraryLayout;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use walkdir::WalkDir;

/// Provider of installed filenames for one model type.
pub trait InstalledModels: Send + Sync {
    /// Installed filenames, sorted and without duplicates.
    fn filenames(&self) -> Vec<Filename>;

    /// Refresh the listing after files were added, renamed or removed.
    fn reload(&self);

    /// Directories holding the files, the default one first.
    fn directories(&self) -> Vec<PathBuf>;
}

/// File extensions recognized as models of a type.
pub fn model_extensions(model_type: ModelType) -> &'static [&'static str] {
    match model_type {
        ModelType::Checkpoint => &[".ckpt", ".safetensors"],
        ModelType::Embedding => &[".pt", ".bin", ".safetensors"],
        ModelType::Hypernetwork => &[".pt"],
        ModelType::Lora | ModelType::Lycoris | ModelType::Vae => {
            &[".pt", ".ckpt", ".safetensors"]
        }
    }
}

/// First existing path for `filename` across `dirs`.
pub fn find_file(dirs: &[PathBuf], filename: &Filename) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(filename.as_str()))
        .find(|path| path.exists())
}

/// Filesystem listing of regular files with model extensions.
///
/// Symlinks are skipped, so companion links placed next to a model are not
/// reported as models themselves. Listing is cached until [`reload`].
///
/// [`reload`]: InstalledModels::reload
pub struct DirectoryIndex {
    model_type: ModelType,
    dirs: Vec<PathBuf>,
    names: RwLock<Option<Vec<Filename>>>,
}

impl DirectoryIndex {
    pub fn new(model_type: ModelType, dirs: Vec<PathBuf>) -> Self {
        Self {
            model_type,
            dirs,
            names: RwLock::new(None),
        }
    }

    fn scan(&self) -> Vec<Filename> {
        let extensions = model_extensions(self.model_type);
        let mut names = BTreeSet::new();

        for dir in &self.dirs {
            for entry in WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if name.starts_with('.') {
                    continue;
                }
                let filename = Filename::parse(&name);
                if extensions
                    .iter()
                    .any(|ext| filename.extension().eq_ignore_ascii_case(ext))
                {
                    names.insert(filename);
                }
            }
        }

        debug!("Indexed {} {} models", names.len(), self.model_type);
        names.into_iter().collect()
    }
}

impl InstalledModels for DirectoryIndex {
    fn filenames(&self) -> Vec<Filename> {
        if let Some(names) = self
            .names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return names.clone();
        }
        let names = self.scan();
        *self.names.write().unwrap_or_else(PoisonError::into_inner) = Some(names.clone());
        names
    }

    fn reload(&self) {
        let names = self.scan();
        *self.names.write().unwrap_or_else(PoisonError::into_inner) = Some(names);
    }

    fn directories(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }
}

/// Optional provider per model type.
#[derive(Clone, Default)]
pub struct ModelSources {
    providers: HashMap<ModelType, Arc<dyn InstalledModels>>,
}

impl ModelSources {
    /// No providers at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A [`DirectoryIndex`] for every type over the layout's directories.
    pub fn from_layout(layout: &LibraryLayout) -> Self {
        let mut sources = Self::empty();
        for model_type in ModelType::ALL {
            let index = DirectoryIndex::new(model_type, layout.directories(model_type));
            sources.set(model_type, Arc::new(index));
        }
        sources
    }

    /// Install or replace the provider for a type.
    pub fn set(&mut self, model_type: ModelType, provider: Arc<dyn InstalledModels>) {
        self.providers.insert(model_type, provider);
    }

    pub fn with(mut self, model_type: ModelType, provider: Arc<dyn InstalledModels>) -> Self {
        self.set(model_type, provider);
        self
    }

    /// Remove the provider for a type.
    pub fn without(mut self, model_type: ModelType) -> Self {
        self.providers.remove(&model_type);
        self
    }

    pub fn provider(&self, model_type: ModelType) -> Option<&Arc<dyn InstalledModels>> {
        self.providers.get(&model_type)
    }

    /// Installed filenames; empty when the type has no provider.
    pub fn filenames(&self, model_type: ModelType) -> Vec<Filename> {
        self.provider(model_type)
            .map(|p| p.filenames())
            .unwrap_or_default()
    }

    pub fn reload(&self, model_type: ModelType) {
        if let Some(provider) = self.provider(model_type) {
            provider.reload();
        }
    }

    pub fn directories(&self, model_type: ModelType) -> Vec<PathBuf> {
        self.provider(model_type)
            .map(|p| p.directories())
            .unwrap_or_default()
    }

    /// Whether a name is listed for a type, ignoring case.
    pub fn contains_ignore_case(&self, model_type: ModelType, filename: &Filename) -> bool {
        self.filenames(model_type)
            .iter()
            .any(|f| f.as_str().eq_ignore_ascii_case(filename.as_str()))
    }

    /// First existing path of an installed file.
    pub fn find_file(&self, model_type: ModelType, filename: &Filename) -> Option<PathBuf> {
        find_file(&self.directories(model_type), filename)
    }

    /// Default directory for a type, when it has a provider with directories.
    pub fn default_directory(&self, model_type: ModelType) -> Option<PathBuf> {
        self.directories(model_type).into_iter().next()
    }
}
