//! Model images, the preview link and the companion link.
//!
//! Images live in the shared images directory as `{TYPE}_{name}.{index}.png`.
//! Indices below [`ImageConfig::CUSTOM_INDEX_START`] are the position of the
//! image in the catalog version; user-added images count up from there.

use super::filename::Filename;
use super::handle::ModelHandle;
use super::registry::ModelRegistry;
use super::types::ModelType;
use crate::config::ImageConfig;
use crate::error::{Result, ShelfError};
use crate::platform;
use crate::transfer::image::convert_to_png;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of image `index` of a model: `{image_key}.{index}.png`.
///
/// The index is always appended. A model name that itself ends in
/// `.<digits>` keeps those digits.
pub fn image_file_name(image_key: &str, index: u32) -> String {
    format!(
        "{}{}{}{}",
        image_key,
        ImageConfig::INDEX_SEPARATOR,
        index,
        ImageConfig::EXTENSION
    )
}

/// Index of an image file, parsed from its name.
pub fn image_index(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_string_lossy();
    Filename::parse(&name).index(ImageConfig::INDEX_SEPARATOR)
}

impl ModelRegistry {
    /// All images of a model, ordered by index.
    pub fn all_images(&self, handle: &ModelHandle) -> Vec<PathBuf> {
        let image_key = handle.image_key();
        let Ok(entries) = std::fs::read_dir(self.layout.images_dir()) else {
            return Vec::new();
        };

        let mut images: Vec<(u32, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let filename = Filename::parse(&name);
                let index = filename.index(ImageConfig::INDEX_SEPARATOR)?;
                (filename.without_index(ImageConfig::INDEX_SEPARATOR) == image_key
                    && filename.prefix().is_empty())
                .then(|| (index, entry.path()))
            })
            .collect();
        images.sort();
        images.into_iter().map(|(_, path)| path).collect()
    }

    /// Images that may be shown. With NSFW hiding on, catalog images not
    /// classified safe are left out; custom images are always visible.
    pub fn visible_images(&self, handle: &ModelHandle) -> Vec<PathBuf> {
        let images = self.all_images(handle);
        if !self.settings.hide_nsfw_images {
            return images;
        }
        let catalog_images = self
            .link(handle)
            .map(|l| l.version.images)
            .unwrap_or_default();

        images
            .into_iter()
            .filter(|path| match image_index(path) {
                Some(index) if index < ImageConfig::CUSTOM_INDEX_START => catalog_images
                    .get(index as usize)
                    .map(|image| image.is_safe())
                    .unwrap_or(true),
                _ => true,
            })
            .collect()
    }

    /// Expected paths of the linked version's catalog images.
    pub fn image_files(&self, handle: &ModelHandle) -> Vec<PathBuf> {
        let Some(link) = self.link(handle) else {
            return Vec::new();
        };
        let image_key = handle.image_key();
        let images_dir = self.layout.images_dir();
        (0..link.version.images.len() as u32)
            .map(|i| images_dir.join(image_file_name(&image_key, i)))
            .collect()
    }

    /// Catalog images not downloaded yet.
    pub fn missing_images(&self, handle: &ModelHandle) -> Vec<PathBuf> {
        self.image_files(handle)
            .into_iter()
            .filter(|p| !p.exists())
            .collect()
    }

    pub fn has_preview(&self, handle: &ModelHandle) -> bool {
        self.preview_file(handle).exists()
    }

    /// Index of the image the preview link points at.
    pub fn preview_index(&self, handle: &ModelHandle) -> Option<u32> {
        let target = std::fs::read_link(self.preview_file(handle)).ok()?;
        let target_name = target.file_name()?.to_os_string();
        self.all_images(handle)
            .iter()
            .find(|image| image.file_name() == Some(target_name.as_os_str()))
            .and_then(|image| image_index(image))
    }

    /// Point the preview link at an image.
    pub fn set_preview(&self, handle: &ModelHandle, image: &Path) -> Result<()> {
        handle.ensure_live()?;
        if !image.exists() {
            return Err(ShelfError::FileNotFound(image.to_path_buf()));
        }
        let target = image.canonicalize().map_err(|e| ShelfError::io_with_path(e, image))?;
        platform::replace_file_symlink(&target, &self.preview_file(handle))?;
        info!("Set preview for model {}", handle.filename());
        Ok(())
    }

    /// First visible image with `index`, or the first visible image when
    /// `index` is `None`.
    pub fn image_by_index(&self, handle: &ModelHandle, index: Option<u32>) -> Option<PathBuf> {
        self.visible_images(handle)
            .into_iter()
            .find(|image| index.is_none() || image_index(image) == index)
    }

    /// Select a preview. Returns whether an image was found.
    pub fn select_preview(&self, handle: &ModelHandle, index: Option<u32>) -> Result<bool> {
        match self.image_by_index(handle, index) {
            Some(image) => {
                self.set_preview(handle, &image)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The preview points at an image that is not visible, e.g. an NSFW
    /// image while hiding is on.
    pub fn has_hidden_preview(&self, handle: &ModelHandle) -> bool {
        if !self.has_preview(handle) {
            return false;
        }
        match self.preview_index(handle) {
            Some(index) => self.image_by_index(handle, Some(index)).is_none(),
            None => true,
        }
    }

    /// No preview although a visible image exists.
    pub fn has_missing_preview(&self, handle: &ModelHandle) -> bool {
        !self.has_preview(handle) && !self.visible_images(handle).is_empty()
    }

    /// Replace a hidden or missing preview with the first visible image.
    /// Returns whether anything changed.
    pub fn fix_preview(&self, handle: &ModelHandle) -> Result<bool> {
        if self.has_hidden_preview(handle) {
            platform::remove_if_present(&self.preview_file(handle))?;
            info!("Removed hidden preview for {}", handle.name());
            self.select_preview(handle, None)?;
            return Ok(true);
        }
        if self.has_missing_preview(handle) {
            return self.select_preview(handle, None);
        }
        Ok(false)
    }

    /// Next free index for a user-added image.
    fn next_custom_index(&self, handle: &ModelHandle) -> u32 {
        let mut index = ImageConfig::CUSTOM_INDEX_START;
        for used in self.all_images(handle).iter().filter_map(|p| image_index(p)) {
            if used < ImageConfig::CUSTOM_INDEX_START {
                continue;
            }
            if used == index {
                index += 1;
            } else if used > index {
                break;
            }
        }
        index
    }

    /// Copy a user image into the images directory as PNG.
    ///
    /// The image becomes the preview when the model has none, or when
    /// `replace_preview` is set.
    pub fn add_custom_image(
        &self,
        handle: &ModelHandle,
        source: &Path,
        replace_preview: bool,
    ) -> Result<PathBuf> {
        handle.ensure_live()?;
        if !source.is_file() {
            return Err(ShelfError::FileNotFound(source.to_path_buf()));
        }

        let index = self.next_custom_index(handle);
        let images_dir = self.layout.images_dir();
        std::fs::create_dir_all(&images_dir)
            .map_err(|e| ShelfError::io_with_path(e, &images_dir))?;
        let destination = images_dir.join(image_file_name(&handle.image_key(), index));

        convert_to_png(source, &destination)?;

        if replace_preview || !self.has_preview(handle) {
            self.set_preview(handle, &destination)?;
        }
        info!("Added custom image {}", destination.display());
        Ok(destination)
    }

    /// Delete a visible image. Removing the preview image re-selects the
    /// first remaining visible image.
    pub fn remove_image(&self, handle: &ModelHandle, index: u32) -> Result<bool> {
        handle.ensure_live()?;
        let Some(image) = self.image_by_index(handle, Some(index)) else {
            return Ok(false);
        };

        let was_preview = self.preview_index(handle) == Some(index);
        if was_preview {
            platform::remove_if_present(&self.preview_file(handle))?;
        }
        std::fs::remove_file(&image).map_err(|e| ShelfError::io_with_path(e, &image))?;
        debug!("Removed image {}", image.display());

        if was_preview {
            self.select_preview(handle, None)?;
        }
        Ok(true)
    }

    // ========================================
    // Companion link
    // ========================================

    /// Existing `{name}.vae.*` links next to the model.
    pub fn companion_links(&self, handle: &ModelHandle) -> Vec<PathBuf> {
        let name = handle.name();
        let Ok(entries) = std::fs::read_dir(self.sidecar_dir(handle)) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|path| {
                let Some(file_name) = path.file_name() else {
                    return false;
                };
                let filename = Filename::parse(&file_name.to_string_lossy());
                filename.base() == name
                    && filename.prefix() == ".vae"
                    && platform::is_symlink(path)
            })
            .collect()
    }

    /// Link the installed companion next to the model as
    /// `{name}.vae{companion extension}`.
    ///
    /// Returns the link path, or `None` when links are disabled or no
    /// companion is installed.
    pub fn link_companion(&self, handle: &ModelHandle) -> Result<Option<PathBuf>> {
        handle.ensure_live()?;
        if !self.settings.create_vae_symlinks {
            return Ok(None);
        }
        let Some(companion) = self.companion_of(handle) else {
            return Ok(None);
        };

        let target = self.file_path(&companion)?;
        let link = self.sidecar_dir(handle).join(
            handle
                .filename()
                .with_prefix(".vae")
                .with_extension(companion.filename().extension())
                .as_str(),
        );

        self.delete_companion_symlink(handle)?;
        platform::replace_file_symlink(&target, &link)?;
        self.sources.reload(handle.model_type());
        self.sources.reload(ModelType::Vae);
        info!("Linked companion {} to {}", companion.name(), handle.name());
        Ok(Some(link))
    }

    /// Bring the companion link in line with the symlink setting: create it
    /// when missing, or remove it when links are disabled.
    pub fn fix_companion_link(&self, handle: &ModelHandle) -> Result<bool> {
        if !self.settings.create_vae_symlinks {
            return Ok(self.delete_companion_symlink(handle)? > 0);
        }
        if self.companion_of(handle).is_none() || !self.companion_links(handle).is_empty() {
            return Ok(false);
        }
        Ok(self.link_companion(handle)?.is_some())
    }

    /// Remove every companion link of the model. Returns how many were
    /// removed.
    pub fn delete_companion_symlink(&self, handle: &ModelHandle) -> Result<usize> {
        let mut removed = 0;
        for link in self.companion_links(handle) {
            if platform::remove_if_present(&link)? {
                info!("Removed companion link {}", link.display());
                removed += 1;
            }
        }
        Ok(removed)
    }
}
