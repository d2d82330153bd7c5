//! Download jobs and their observable snapshots.

use super::progress::{estimate_remaining, Throughput};
use crate::catalog::{CatalogFile, CatalogImage};
use crate::config::{ImageConfig, LibraryLayout, NetworkConfig};
use crate::format::{format_percentage, format_size_bytes, format_speed, format_time};
use crate::model_library::{image_file_name, Filename, ModelSources, ModelType};
use crate::network::HttpClient;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

pub type JobId = Uuid;

/// Separator used to make a downloaded model name unique.
pub const UNIQUE_SEPARATOR: char = '_';

static CONTENT_TYPE_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"image/(\w+)").unwrap());

static DISPOSITION_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filename="([\w.\-]+)""#).unwrap());

/// Lifecycle of a job. Moves forward only:
/// `Queued -> Downloading -> Complete | Failed`. `Invalid` jobs are never
/// queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Invalid,
    Queued,
    Downloading,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Invalid => "Invalid",
            JobStatus::Queued => "Queued",
            JobStatus::Downloading => "Downloading",
            JobStatus::Complete => "Complete",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Position in the lifecycle, for ordering checks.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Invalid => 0,
            JobStatus::Queued => 1,
            JobStatus::Downloading => 2,
            JobStatus::Complete | JobStatus::Failed => 3,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a download lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobTarget {
    /// The type's default model directory.
    Model,
    /// The shared images directory; the result is transcoded to PNG.
    Image,
}

/// What to download and under which name.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub url: String,
    pub model_type: ModelType,
    pub filename: Filename,
    pub target: JobTarget,
}

impl JobRequest {
    /// A model file download.
    pub fn new(url: impl Into<String>, model_type: ModelType, filename: Filename) -> Self {
        Self {
            url: url.into(),
            model_type,
            filename,
            target: JobTarget::Model,
        }
    }

    /// An image download into the images directory.
    pub fn image(url: impl Into<String>, model_type: ModelType, filename: Filename) -> Self {
        Self {
            url: url.into(),
            model_type,
            filename,
            target: JobTarget::Image,
        }
    }

    /// Download a catalog file under its catalog name.
    pub fn from_file(model_type: ModelType, file: &CatalogFile) -> Self {
        Self::new(file.download_url.clone(), model_type, Filename::parse(&file.name))
    }

    /// Download a catalog image for a model.
    ///
    /// `filename` is the model's filename carrying the image index, e.g.
    /// `castle.3.safetensors`; the image is stored as
    /// `{TYPE}_castle.3.png`.
    pub fn from_image(
        model_type: ModelType,
        image: &CatalogImage,
        model_filename: &Filename,
        index: u32,
        width_limit: bool,
    ) -> Self {
        let name = image_file_name(&model_type.image_key(model_filename.base()), index);
        Self::image(image.download_url(width_limit), model_type, Filename::parse(&name))
    }
}

/// A download owned by the transfer engine.
#[derive(Debug)]
pub struct DownloadJob {
    pub(crate) id: JobId,
    pub(crate) url: String,
    pub(crate) model_type: ModelType,
    pub(crate) target: JobTarget,
    pub(crate) directory: PathBuf,
    pub(crate) filename: Filename,
    pub(crate) status: JobStatus,
    pub(crate) expected_size: u64,
    pub(crate) transferred: u64,
    pub(crate) throughput: Throughput,
    pub(crate) eta_secs: f64,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) error: Option<String>,
    pub(crate) response: Option<Response>,
}

impl DownloadJob {
    fn new(request: &JobRequest, directory: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: request.url.clone(),
            model_type: request.model_type,
            target: request.target,
            directory,
            filename: request.filename.clone(),
            status: JobStatus::Invalid,
            expected_size: 0,
            transferred: 0,
            throughput: Throughput::new(NetworkConfig::THROUGHPUT_WINDOW),
            eta_secs: 0.0,
            started_at: None,
            finished_at: None,
            error: None,
            response: None,
        }
    }

    /// Issue the request and settle the job's final name.
    ///
    /// The returned job is `Queued` with an open response, or `Invalid` when
    /// the request failed or the destination already exists.
    pub(crate) async fn prepare(
        request: JobRequest,
        http: &HttpClient,
        sources: &ModelSources,
        layout: &LibraryLayout,
    ) -> Self {
        debug!("Preparing download for {}", request.url);
        let directory = match request.target {
            JobTarget::Image => layout.images_dir(),
            JobTarget::Model => sources
                .default_directory(request.model_type)
                .unwrap_or_else(|| layout.default_directory(request.model_type)),
        };
        let mut job = Self::new(&request, directory);

        let response = match http.get(&request.url).await {
            Ok(response) => response,
            Err(e) => {
                error!("The download request failed: {}", e);
                job.error = Some(e.to_string());
                return job;
            }
        };

        let extension = header_extension(&response)
            .unwrap_or_else(|| request.filename.extension().to_string());
        job.filename = request.filename.with_extension(&extension);
        job.expected_size = response.content_length().unwrap_or(0);

        if job.target == JobTarget::Model {
            job.filename = job.filename.find_available(UNIQUE_SEPARATOR, |candidate| {
                sources.contains_ignore_case(request.model_type, candidate)
            });
        }

        let destination = job.path();
        if destination.symlink_metadata().is_ok() {
            error!("File already exists: {}", destination.display());
            job.error = Some(format!("file already exists: {}", destination.display()));
            return job;
        }

        job.response = Some(response);
        job.status = JobStatus::Queued;
        job
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Name the file ends up with. Images always end up as PNG.
    pub fn final_filename(&self) -> Filename {
        match self.target {
            JobTarget::Image => self.filename.with_extension(ImageConfig::EXTENSION),
            JobTarget::Model => self.filename.clone(),
        }
    }

    /// Final destination path.
    pub fn path(&self) -> PathBuf {
        self.directory.join(self.final_filename().as_str())
    }

    // ========================================
    // Worker-side transitions
    // ========================================

    pub(crate) fn begin(&mut self) {
        if self.path().symlink_metadata().is_ok() {
            self.filename = self
                .filename
                .find_nonexistent(&self.directory, UNIQUE_SEPARATOR);
        }
        self.status = JobStatus::Downloading;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn record_chunk(&mut self, bytes: usize, now: Instant) {
        self.transferred += bytes as u64;
        self.throughput.record(bytes, now);
        self.eta_secs = estimate_remaining(self.expected_size, self.transferred, self.throughput.mean());
    }

    /// Whether the transferred byte count is acceptable. An undeclared size
    /// accepts anything.
    pub(crate) fn size_matches(&self) -> bool {
        self.expected_size == 0 || self.transferred == self.expected_size
    }

    pub(crate) fn complete(&mut self) {
        self.status = JobStatus::Complete;
        self.finished_at = Some(Utc::now());
        self.eta_secs = 0.0;
        self.throughput.clear();
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(message.into());
        self.finished_at = Some(Utc::now());
        self.throughput.clear();
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            url: self.url.clone(),
            model_type: self.model_type,
            target: self.target,
            filename: self.final_filename().to_string(),
            directory: self.directory.clone(),
            status: self.status,
            expected_size: self.expected_size,
            transferred: self.transferred,
            mean_speed: self.throughput.mean(),
            eta_secs: self.eta_secs,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
        }
    }
}

/// Extension announced by the response headers: the content-type subtype for
/// images, otherwise the content-disposition filename's extension.
fn header_extension(response: &Response) -> Option<String> {
    let headers = response.headers();
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let disposition = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    extension_from_headers(content_type, disposition)
}

pub(crate) fn extension_from_headers(content_type: &str, disposition: &str) -> Option<String> {
    if content_type.contains("image") {
        return CONTENT_TYPE_IMAGE
            .captures(content_type)
            .map(|c| format!(".{}", &c[1]));
    }
    DISPOSITION_FILENAME
        .captures(disposition)
        .map(|c| Filename::parse(&c[1]).extension().to_string())
        .filter(|ext| !ext.is_empty())
}

/// Read-only view of a job, safe to hand to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub model_type: ModelType,
    pub target: JobTarget,
    pub filename: String,
    pub directory: PathBuf,
    pub status: JobStatus,
    pub expected_size: u64,
    pub transferred: u64,
    pub mean_speed: f64,
    pub eta_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    pub fn is_complete(&self) -> bool {
        self.status == JobStatus::Complete
    }

    /// `42.5%`; complete jobs of unknown size read `100.0%`.
    pub fn percentage(&self) -> String {
        if self.expected_size == 0 || self.transferred == 0 {
            let done = if self.is_complete() { "100.0%" } else { "0.0%" };
            return done.to_string();
        }
        format_percentage(self.transferred, self.expected_size)
    }

    /// `1.20 MB / 2.50 MB`, or `-` when the size is unknown.
    pub fn progress(&self) -> String {
        if self.expected_size == 0 {
            return "-".to_string();
        }
        format!(
            "{} / {}",
            format_size_bytes(self.transferred),
            format_size_bytes(self.expected_size)
        )
    }

    pub fn speed(&self) -> String {
        format_speed(self.mean_speed)
    }

    /// Remaining time, or `-` when there is no estimate.
    pub fn eta(&self) -> String {
        if self.eta_secs == 0.0 {
            return "-".to_string();
        }
        format_time(self.eta_secs)
    }
}
