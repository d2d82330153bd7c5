//! Background transfer engine.
//!
//! One worker task downloads queued jobs strictly one at a time, in enqueue
//! order. Observers poll [`TransferEngine::snapshots`]; there is no
//! completion callback.

use super::image::convert_to_png;
use super::job::{DownloadJob, JobId, JobRequest, JobSnapshot, JobStatus, JobTarget};
use crate::cancel::CancellationToken;
use crate::config::{LibraryLayout, NetworkConfig};
use crate::error::{Result, ShelfError};
use crate::model_library::ModelSources;
use crate::network::HttpClient;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type JobList = Arc<RwLock<Vec<DownloadJob>>>;

/// Sequential downloader shared by every caller of a [`crate::ModelShelf`].
pub struct TransferEngine {
    http: HttpClient,
    sources: ModelSources,
    layout: LibraryLayout,
    jobs: JobList,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransferEngine {
    pub fn new(http: HttpClient, sources: ModelSources, layout: LibraryLayout) -> Self {
        Self {
            http,
            sources,
            layout,
            jobs: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========================================
    // Queue
    // ========================================

    /// Issue the request for a job without queueing it.
    pub async fn prepare(&self, request: JobRequest) -> DownloadJob {
        DownloadJob::prepare(request, &self.http, &self.sources, &self.layout).await
    }

    /// Queue a prepared job.
    ///
    /// Invalid jobs and jobs whose URL is already in the list are rejected.
    pub async fn enqueue(&self, job: DownloadJob) -> Result<JobId> {
        if job.status() != JobStatus::Queued {
            return Err(ShelfError::DownloadFailed {
                url: job.url().to_string(),
                message: job
                    .error()
                    .unwrap_or("the job is not ready to download")
                    .to_string(),
            });
        }

        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.url == job.url) {
            debug!("File {} already in download queue", job.filename);
            return Err(duplicate(&job.url));
        }
        debug!("Enqueuing file {}", job.filename);
        let id = job.id();
        jobs.push(job);
        Ok(id)
    }

    /// Prepare and queue a request. Duplicate URLs are rejected before any
    /// request is sent.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId> {
        if self.contains_url(&request.url).await {
            return Err(duplicate(&request.url));
        }
        let job = self.prepare(request).await;
        self.enqueue(job).await
    }

    pub async fn contains_url(&self, url: &str) -> bool {
        self.jobs.read().await.iter().any(|j| j.url == url)
    }

    // ========================================
    // Worker control
    // ========================================

    /// Start the worker. Does nothing when it is already running.
    pub async fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Transfer engine is already running");
            return;
        }

        let jobs = self.jobs.clone();
        let running = self.running.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            run_worker(jobs, running, cancel).await;
        });
        *self.worker.lock().await = Some(handle);
        info!("Transfer engine started");
    }

    /// Cancel the running job, wait for the worker to exit, then clear the
    /// job list.
    ///
    /// The interrupted job keeps its `Downloading` status and its temporary
    /// file is removed.
    pub async fn stop(&self) {
        if !self.is_running() {
            debug!("Transfer engine is not running");
            return;
        }

        self.cancel.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Transfer worker panicked: {}", e);
                fail_incomplete(&self.jobs, &format!("transfer worker panicked: {}", e)).await;
            }
        }
        self.running.store(false, Ordering::SeqCst);
        self.cancel.reset();
        self.clear().await;
        info!("Transfer engine stopped");
    }

    /// Drop every job. Refused while the worker runs.
    pub async fn clear(&self) -> bool {
        if self.is_running() {
            warn!("Not clearing the download queue while the engine is running");
            return false;
        }
        self.jobs.write().await.clear();
        true
    }

    /// Poll until the worker has exited.
    ///
    /// A worker that panicked leaves its unfinished jobs failed.
    pub async fn wait(&self) {
        while self.is_running() {
            tokio::time::sleep(NetworkConfig::PROGRESS_POLL_INTERVAL).await;
        }
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Transfer worker panicked: {}", e);
                fail_incomplete(&self.jobs, &format!("transfer worker panicked: {}", e)).await;
            }
        }
    }

    // ========================================
    // Observation
    // ========================================

    pub async fn snapshots(&self) -> Vec<JobSnapshot> {
        self.jobs.read().await.iter().map(|j| j.snapshot()).collect()
    }

    /// Snapshots without waiting, or `None` when the worker holds the list.
    pub fn try_snapshots(&self) -> Option<Vec<JobSnapshot>> {
        let jobs = self.jobs.try_read().ok()?;
        Some(jobs.iter().map(|j| j.snapshot()).collect())
    }

    pub async fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs
            .read()
            .await
            .iter()
            .find(|j| j.id == id)
            .map(|j| j.snapshot())
    }

    pub async fn all_complete(&self) -> bool {
        self.jobs
            .read()
            .await
            .iter()
            .all(|j| j.status() == JobStatus::Complete)
    }

    pub async fn incomplete(&self) -> Vec<JobSnapshot> {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|j| j.status() != JobStatus::Complete)
            .map(|j| j.snapshot())
            .collect()
    }
}

fn duplicate(url: &str) -> ShelfError {
    ShelfError::Conflict {
        message: format!("{} is already in the download queue", url),
    }
}

// ========================================
// Worker
// ========================================

async fn next_queued(jobs: &JobList) -> Option<JobId> {
    jobs.read()
        .await
        .iter()
        .find(|j| j.status() == JobStatus::Queued)
        .map(|j| j.id())
}

/// Clears the running flag when the worker unwinds, so a panic does not
/// leave the engine looking busy forever.
struct PanicGuard {
    running: Arc<AtomicBool>,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

async fn run_worker(jobs: JobList, running: Arc<AtomicBool>, cancel: CancellationToken) {
    let _guard = PanicGuard {
        running: running.clone(),
    };
    loop {
        while let Some(id) = next_queued(&jobs).await {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = run_job(&jobs, id, &cancel).await {
                error!("Download thread failed: {}", e);
                fail_incomplete(&jobs, &e.to_string()).await;
                break;
            }
        }

        running.store(false, Ordering::SeqCst);
        // Pick up jobs queued after the last check, unless a new start won
        if cancel.is_cancelled()
            || next_queued(&jobs).await.is_none()
            || running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            break;
        }
    }
    debug!("Download thread stopped");
}

/// Mark every job that has not completed as failed.
async fn fail_incomplete(jobs: &JobList, message: &str) {
    for job in jobs.write().await.iter_mut() {
        if !matches!(job.status(), JobStatus::Complete | JobStatus::Failed) {
            job.response = None;
            job.fail(message);
        }
    }
}

async fn update<F: FnOnce(&mut DownloadJob)>(jobs: &JobList, id: JobId, f: F) {
    if let Some(job) = jobs.write().await.iter_mut().find(|j| j.id == id) {
        f(job);
    }
}

fn discard(temp: TempPath) {
    let path = temp.to_path_buf();
    if let Err(e) = temp.close() {
        warn!("Failed to remove temporary file {}: {}", path.display(), e);
    }
}

/// Download one job.
///
/// Network, size and image failures fail this job only. Any other error is
/// returned and fails the rest of the batch.
async fn run_job(jobs: &JobList, id: JobId, cancel: &CancellationToken) -> Result<()> {
    let (response, directory, filename, target) = {
        let mut jobs = jobs.write().await;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(());
        };
        let Some(response) = job.response.take() else {
            job.fail("the download request is no longer available");
            return Ok(());
        };
        job.begin();
        (response, job.directory.clone(), job.filename.clone(), job.target)
    };
    info!("Downloading {}", filename);

    std::fs::create_dir_all(&directory).map_err(|e| ShelfError::io_with_path(e, &directory))?;
    let temp = tempfile::Builder::new()
        .prefix(NetworkConfig::DOWNLOAD_TEMP_PREFIX)
        .suffix(NetworkConfig::DOWNLOAD_TEMP_SUFFIX)
        .tempfile_in(&directory)
        .map_err(|e| ShelfError::io_with_path(e, &directory))?;
    let (file, temp_path) = temp.into_parts();
    let mut writer = BufWriter::with_capacity(
        NetworkConfig::DOWNLOAD_CHUNK_SIZE,
        tokio::fs::File::from_std(file),
    );

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            drop(writer);
            discard(temp_path);
            update(jobs, id, |job| job.throughput.clear()).await;
            info!("Download of {} stopped", filename);
            return Ok(());
        }

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(writer);
                discard(temp_path);
                error!("Download failed: {}: {}", filename, e);
                update(jobs, id, |job| job.fail(format!("download stream failed: {}", e))).await;
                return Ok(());
            }
        };

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| ShelfError::io_with_path(e, temp_path.to_path_buf()))?;
        let now = Instant::now();
        update(jobs, id, |job| job.record_chunk(chunk.len(), now)).await;
    }
    writer
        .flush()
        .await
        .map_err(|e| ShelfError::io_with_path(e, temp_path.to_path_buf()))?;
    drop(writer);

    let (size_ok, expected, transferred, destination) = {
        let jobs = jobs.read().await;
        match jobs.iter().find(|j| j.id == id) {
            Some(job) => (job.size_matches(), job.expected_size, job.transferred, job.path()),
            None => return Ok(()),
        }
    };
    if !size_ok {
        discard(temp_path);
        let mismatch = ShelfError::SizeMismatch {
            expected,
            actual: transferred,
        };
        error!("Download failed: {}: {}", filename, mismatch);
        update(jobs, id, |job| job.fail(mismatch.to_string())).await;
        return Ok(());
    }

    match target {
        JobTarget::Image => {
            let dest = destination.clone();
            let converted = tokio::task::spawn_blocking(move || {
                let result = convert_to_png(&temp_path, &dest);
                discard(temp_path);
                result
            })
            .await
            .map_err(|e| ShelfError::Other(format!("image conversion task failed: {}", e)))?;

            if let Err(e) = converted {
                error!("Download failed: {}: {}", filename, e);
                update(jobs, id, |job| job.fail(e.to_string())).await;
                return Ok(());
            }
        }
        JobTarget::Model => {
            temp_path
                .persist(&destination)
                .map_err(|e| ShelfError::io_with_path(e.error, &destination))?;
        }
    }

    update(jobs, id, |job| job.complete()).await;
    debug!("Download complete: {}", destination.display());
    Ok(())
}
