//! Download requests derived from a model's catalog link, and adoption of
//! finished downloads.

use super::filename::Filename;
use super::handle::ModelHandle;
use super::images::{image_file_name, image_index};
use super::registry::ModelRegistry;
use super::types::ModelType;
use crate::error::{Result, ShelfError};
use crate::transfer::JobRequest;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

impl ModelRegistry {
    /// Requests for the catalog images not downloaded yet.
    pub fn image_jobs(&self, handle: &ModelHandle) -> Vec<JobRequest> {
        let Some(link) = self.link(handle) else {
            return Vec::new();
        };
        self.missing_images(handle)
            .into_iter()
            .filter_map(|path| {
                let index = image_index(&path)?;
                let image = link.version.images.get(index as usize)?;
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(JobRequest::image(
                    image.download_url(self.settings.image_width_limit),
                    handle.model_type(),
                    Filename::parse(&name),
                ))
            })
            .collect()
    }

    /// Request for the companion file when it is listed but not installed.
    pub fn companion_job(&self, handle: &ModelHandle) -> Option<JobRequest> {
        if !self.companion_missing(handle) {
            return None;
        }
        let file = self.companion_file(handle)?;
        Some(JobRequest::from_file(ModelType::Vae, &file))
    }

    /// Request for the latest version's primary file when the model is
    /// outdated.
    pub fn latest_job(&self, handle: &ModelHandle) -> Option<JobRequest> {
        if !self.is_updatable(handle) {
            return None;
        }
        let model = self.catalog_model(handle)?;
        let file = model.latest_version()?.primary_file()?;
        Some(JobRequest::from_file(handle.model_type(), file))
    }

    /// Take in a freshly downloaded model.
    ///
    /// Reloads the installed names, scans the model, renames the downloaded
    /// `images` to the model's image key keeping their indices, and selects a
    /// preview.
    pub async fn adopt_download(
        &self,
        model_type: ModelType,
        filename: &Filename,
        images: &[PathBuf],
    ) -> Result<Arc<ModelHandle>> {
        self.sources.reload(model_type);
        let handle = self.get(model_type, filename)?;
        self.scan(&handle, false).await?;

        let image_key = handle.image_key();
        for image in images {
            let Some(index) = image_index(image) else {
                debug!("Skipping image without an index: {}", image.display());
                continue;
            };
            let renamed = image.with_file_name(image_file_name(&image_key, index));
            if renamed != *image {
                std::fs::rename(image, &renamed).map_err(|e| ShelfError::io_with_path(e, image))?;
            }
        }

        self.select_preview(&handle, None)?;
        info!("Adopted download {}", handle.key());
        Ok(handle)
    }
}
