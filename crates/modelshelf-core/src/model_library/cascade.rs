//! Rename and delete, with every artifact that hangs off a model.
//!
//! Both operations check all preconditions first and return an error before
//! touching the filesystem when one fails.

use super::filename::Filename;
use super::handle::ModelHandle;
use super::images::image_index;
use super::registry::ModelRegistry;
use crate::config::ImageConfig;
use crate::error::{Result, ShelfError};
use crate::platform;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl ModelRegistry {
    /// Check a new model name without changing anything.
    ///
    /// The name must be a plain base: no prefix, extension or trailing
    /// `.<digits>` index, which would be read back as an image index.
    pub fn validate_rename(&self, handle: &ModelHandle, new_name: &str) -> Result<Filename> {
        let new_filename = self.validate_base(handle, new_name)?;
        if new_filename.index(ImageConfig::INDEX_SEPARATOR).is_some() {
            return Err(ShelfError::validation(
                "name",
                "the new model name cannot contain a prefix, extension or index",
            ));
        }
        Ok(new_filename)
    }

    /// Checks shared by user renames and catalog name resets.
    fn validate_base(&self, handle: &ModelHandle, new_name: &str) -> Result<Filename> {
        handle.ensure_live()?;
        let filename = handle.filename();

        if new_name.trim().is_empty() {
            return Err(ShelfError::validation("name", "the new model name cannot be empty"));
        }
        if new_name == filename.base() {
            return Err(ShelfError::validation(
                "name",
                "the new model name is the same as the current name",
            ));
        }
        if new_name.contains(['/', '\\']) {
            return Err(ShelfError::validation(
                "name",
                "the new model name cannot contain path separators",
            ));
        }

        let new_filename = filename.with_base(new_name);
        if new_filename.base() != new_name {
            return Err(ShelfError::validation(
                "name",
                "the new model name cannot contain a prefix, extension or index",
            ));
        }

        // Names sharing the current base are this model and its own links.
        let case_only = new_name.eq_ignore_ascii_case(filename.base());
        let taken = self
            .sources
            .filenames(handle.model_type())
            .iter()
            .filter(|f| f.base() != filename.base())
            .any(|f| f.base().eq_ignore_ascii_case(new_name));
        let current = self.file_path(handle)?;
        let target = sibling_path(&current, &new_filename);
        if taken || (!case_only && platform::path_present(&target)) {
            return Err(ShelfError::Conflict {
                message: format!("the model name \"{}\" already exists", new_name),
            });
        }
        Ok(new_filename)
    }

    /// Rename a model to a new base name.
    ///
    /// Moves the model file, re-keys its scan record, renames its images,
    /// report and companion links, and re-keys the cached handle. The same
    /// handle stays valid under the new key.
    pub fn rename(&self, handle: &Arc<ModelHandle>, new_name: &str) -> Result<()> {
        let new_filename = self.validate_rename(handle, new_name)?;
        self.move_to(handle, new_filename)
    }

    /// Rename back to the catalog file's base name.
    ///
    /// Catalog names are taken as they are, so a base such as
    /// `sd_xl_base_1.0` is accepted here although [`Self::rename`] refuses it.
    pub fn reset_name(&self, handle: &Arc<ModelHandle>) -> Result<()> {
        handle.ensure_live()?;
        let link = self.link(handle).ok_or_else(|| ShelfError::NotInCatalog {
            key: handle.key().to_string(),
        })?;
        let catalog_name = Filename::parse(&link.file.name);
        let new_filename = self.validate_base(handle, catalog_name.base())?;
        self.move_to(handle, new_filename)
    }

    fn move_to(&self, handle: &Arc<ModelHandle>, new_filename: Filename) -> Result<()> {
        let new_name = new_filename.base().to_string();
        let old_key = handle.key();
        let old_file = self.file_path(handle)?;
        let sidecar = self.sidecar_dir(handle);
        let preview = self.preview_file(handle);
        let preview_index = self.preview_index(handle);
        let images = self.all_images(handle);
        let report = self.report_file(handle);
        let links = self.companion_links(handle);
        info!("Renaming model {} to {}", handle.filename(), new_filename);

        let new_file = sibling_path(&old_file, &new_filename);
        std::fs::rename(&old_file, &new_file).map_err(|e| ShelfError::io_with_path(e, &old_file))?;

        handle.set_filename(new_filename.clone());
        let new_key = handle.key();
        if self.scans.rename_key(&old_key, &new_key)? {
            debug!("Renamed scan key to {}", new_key);
        }
        {
            let mut cache = self.cache();
            cache.remove(&old_key);
            cache.insert(new_key, handle.clone());
        }
        self.sources.reload(handle.model_type());

        platform::remove_if_present(&preview)?;
        let image_key = handle.image_key();
        for image in images {
            let Some(index) = image_index(&image) else {
                continue;
            };
            let renamed = image.with_file_name(format!(
                "{}{}{}{}",
                image_key,
                ImageConfig::INDEX_SEPARATOR,
                index,
                image_extension(&image)
            ));
            rename_if_present(&image, &renamed)?;
        }

        if report.exists() {
            rename_if_present(&report, &self.report_file(handle))?;
        }
        for link in links {
            let Some(name) = link.file_name() else {
                continue;
            };
            let renamed = Filename::parse(&name.to_string_lossy()).with_base(&new_name);
            rename_if_present(&link, &sidecar.join(renamed.as_str()))?;
        }

        if let Some(index) = preview_index {
            self.select_preview(handle, Some(index))?;
        }
        self.regenerate_related(handle, true)
    }

    /// Delete a model with its scan record, images, report and links.
    ///
    /// Companion links of other models that point at this file are removed
    /// before the file itself. The handle is marked deleted and dropped from
    /// the cache.
    pub fn delete(&self, handle: &Arc<ModelHandle>) -> Result<()> {
        handle.ensure_live()?;
        let file = self.file_path(handle)?;
        let key = handle.key();
        let parents = self.included_by(handle);
        let siblings: Vec<Arc<ModelHandle>> = self
            .installed_by_model(handle)
            .into_iter()
            .filter(|m| !Arc::ptr_eq(m, handle))
            .collect();
        let preview = self.preview_file(handle);
        let images = self.all_images(handle);
        let report = self.report_file(handle);
        let own_links = self.companion_links(handle);
        info!("Deleting model {}", key);

        for parent in &parents {
            self.delete_companion_symlink(parent)?;
        }

        std::fs::remove_file(&file).map_err(|e| ShelfError::io_with_path(e, &file))?;
        self.sources.reload(handle.model_type());
        if self.scans.remove(&key)? {
            debug!("Deleted scan record {}", key);
        }

        platform::remove_if_present(&preview)?;
        for image in images {
            platform::remove_if_present(&image)?;
            debug!("Deleted image {}", image.display());
        }
        platform::remove_if_present(&report)?;
        for link in own_links {
            platform::remove_if_present(&link)?;
        }

        self.cache().remove(&key);
        handle.mark_deleted();

        for related in siblings.iter().chain(parents.iter()) {
            if let Err(e) = self.generate_report(related) {
                warn!("Failed to refresh report for {}: {}", related.key(), e);
            }
        }
        Ok(())
    }
}

fn sibling_path(path: &Path, filename: &Filename) -> PathBuf {
    path.with_file_name(filename.as_str())
}

fn image_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

fn rename_if_present(from: &Path, to: &Path) -> Result<()> {
    if !platform::path_present(from) {
        return Ok(());
    }
    std::fs::rename(from, to).map_err(|e| ShelfError::io_with_path(e, from))?;
    debug!("Renamed {} to {}", from.display(), to.display());
    Ok(())
}
