//! Subcommand implementations.

use crate::Command;
use anyhow::{anyhow, bail, Context, Result};
use modelshelf_core::config::NetworkConfig;
use modelshelf_core::transfer::JobId;
use modelshelf_core::{
    CatalogApi, Filename, JobRequest, JobSnapshot, JobStatus, ModelHandle, ModelKey, ModelShelf,
    ModelType, TransferEngine,
};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(shelf: &ModelShelf, command: Command) -> Result<()> {
    let registry = shelf.registry();
    match command {
        Command::List { model_type } => {
            for handle in handles(shelf, model_type) {
                let status = registry.status(&handle)?;
                println!("{:<14} {:<10} {}", status.to_string(), handle.short_hash(), handle.key());
            }
        }
        Command::Scan {
            key,
            model_type,
            update,
        } => match key {
            Some(key) => {
                let handle = lookup(shelf, &key)?;
                registry.scan(&handle, update).await?;
                println!("{}: {}", handle.key(), registry.status(&handle)?);
            }
            None => {
                let mut failed = 0;
                for handle in handles(shelf, model_type) {
                    match registry.scan(&handle, update).await {
                        Ok(()) => {}
                        Err(e) if e.is_retryable() => {
                            warn!("Failed to scan {}, try again later: {}", handle.key(), e);
                            failed += 1;
                        }
                        Err(e) => {
                            warn!("Failed to scan {}: {}", handle.key(), e);
                            failed += 1;
                        }
                    }
                }
                if failed > 0 {
                    bail!("{} models failed to scan", failed);
                }
            }
        },
        Command::Show { key } => {
            let handle = lookup(shelf, &key)?;
            print!("{}", registry.build_report(&handle)?);
        }
        Command::Rename { key, new_name } => {
            let handle = lookup(shelf, &key)?;
            registry.rename(&handle, &new_name)?;
            println!("Renamed to {}", handle.key());
        }
        Command::ResetName { key } => {
            let handle = lookup(shelf, &key)?;
            registry.reset_name(&handle)?;
            println!("Renamed to {}", handle.key());
        }
        Command::Delete { key } => {
            let handle = lookup(shelf, &key)?;
            registry.delete(&handle)?;
            println!("Deleted {}", key);
        }
        Command::Preview { key, index } => {
            let handle = lookup(shelf, &key)?;
            if !registry.select_preview(&handle, index)? {
                bail!("no visible image to use as preview");
            }
        }
        Command::AddImage { key, path, preview } => {
            let handle = lookup(shelf, &key)?;
            let added = registry.add_custom_image(&handle, &path, preview)?;
            println!("Added {}", added.display());
        }
        Command::RemoveImage { key, index } => {
            let handle = lookup(shelf, &key)?;
            if !registry.remove_image(&handle, index)? {
                bail!("no image with index {}", index);
            }
        }
        Command::Reports => {
            let count = registry.refresh_reports()?;
            println!("Rebuilt {} reports", count);
        }
        Command::FixPreviews { model_type } => {
            let mut fixed = 0;
            for handle in handles(shelf, model_type) {
                if registry.fix_preview(&handle)? {
                    fixed += 1;
                }
            }
            println!("Fixed {} previews", fixed);
        }
        Command::FixLinks { model_type } => {
            let mut fixed = 0;
            for handle in handles(shelf, model_type) {
                if registry.fix_companion_link(&handle)? {
                    fixed += 1;
                }
            }
            println!("Fixed {} companion links", fixed);
        }
        Command::Purge => {
            let count = shelf.purge_scans()?;
            println!("Purged {} scan records", count);
        }
        Command::Download { model, version } => download(shelf, &model, version).await?,
        Command::Update { model_type } => {
            let requests: Vec<JobRequest> = handles(shelf, model_type)
                .iter()
                .filter_map(|h| registry.latest_job(h))
                .collect();
            adopt_all(shelf, run_batch(shelf, requests).await?).await?;
        }
        Command::FetchVae { model_type } => {
            let requests: Vec<JobRequest> = handles(shelf, model_type)
                .iter()
                .filter_map(|h| registry.companion_job(h))
                .collect();
            adopt_all(shelf, run_batch(shelf, requests).await?).await?;
        }
        Command::FetchImages { model_type } => {
            let requests: Vec<JobRequest> = handles(shelf, model_type)
                .iter()
                .flat_map(|h| registry.image_jobs(h))
                .collect();
            run_batch(shelf, requests).await?;
            for handle in handles(shelf, model_type) {
                if !registry.has_preview(&handle) {
                    registry.select_preview(&handle, None)?;
                }
            }
        }
    }
    Ok(())
}

fn handles(shelf: &ModelShelf, model_type: Option<ModelType>) -> Vec<Arc<ModelHandle>> {
    match model_type {
        Some(model_type) => shelf.registry().by_type(model_type),
        None => shelf.registry().all(),
    }
}

fn lookup(shelf: &ModelShelf, key: &str) -> Result<Arc<ModelHandle>> {
    let key = ModelKey::parse(key)
        .ok_or_else(|| anyhow!("invalid model key {:?}, expected TYPE/filename", key))?;
    Ok(shelf.registry().get(key.model_type, &key.filename)?)
}

/// Queue requests, run the engine and return the completed jobs.
async fn run_batch(shelf: &ModelShelf, requests: Vec<JobRequest>) -> Result<Vec<JobSnapshot>> {
    if requests.is_empty() {
        println!("Nothing to download");
        return Ok(Vec::new());
    }
    let engine = shelf.transfer();
    for request in requests {
        if let Err(e) = engine.submit(request).await {
            warn!("Skipping download: {}", e);
        }
    }
    if !drive(engine).await {
        bail!("downloads stopped");
    }

    let (complete, incomplete): (Vec<JobSnapshot>, Vec<JobSnapshot>) = engine
        .snapshots()
        .await
        .into_iter()
        .partition(|job| job.is_complete());
    engine.clear().await;
    for job in &incomplete {
        warn!(
            "{}: {}",
            job.filename,
            job.error.as_deref().unwrap_or(job.status.label())
        );
    }
    println!("{} downloaded, {} failed", complete.len(), incomplete.len());
    Ok(complete)
}

/// Scan freshly downloaded model files into the library.
async fn adopt_all(shelf: &ModelShelf, jobs: Vec<JobSnapshot>) -> Result<()> {
    for job in jobs {
        let filename = Filename::parse(&job.filename);
        let handle = shelf
            .registry()
            .adopt_download(job.model_type, &filename, &[])
            .await?;
        println!("Installed {}", handle.key());
    }
    Ok(())
}

/// Start the engine and print progress until it stops. Ctrl-C stops it.
///
/// Returns false when interrupted.
async fn drive(engine: &Arc<TransferEngine>) -> bool {
    engine.start().await;
    let mut last_line = String::new();
    while engine.is_running() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping downloads");
                engine.stop().await;
                return false;
            }
            _ = tokio::time::sleep(NetworkConfig::PROGRESS_POLL_INTERVAL) => {}
        }

        let Some(snapshots) = engine.try_snapshots() else {
            continue;
        };
        if let Some(job) = snapshots.iter().find(|j| j.status == JobStatus::Downloading) {
            let line = format!(
                "{} {} {} {} eta {}",
                job.filename,
                job.percentage(),
                job.progress(),
                job.speed(),
                job.eta()
            );
            if line != last_line {
                println!("{}", line);
                last_line = line;
            }
        }
    }
    engine.wait().await;
    true
}

/// Download a catalog model's primary file, and its images when enabled,
/// then adopt the result into the library.
async fn download(shelf: &ModelShelf, model: &str, version_id: Option<u64>) -> Result<()> {
    let registry = shelf.registry();
    let snapshot = registry
        .catalog()
        .model_by_mixed(model)
        .await
        .ok_or_else(|| anyhow!("no catalog model found for {:?}", model))?;
    let catalog_model = snapshot.model;
    let model_type = catalog_model
        .model_type()
        .ok_or_else(|| anyhow!("unsupported model type {}", catalog_model.kind))?;

    let version = match version_id {
        Some(id) => catalog_model.version(id),
        None => catalog_model.latest_version(),
    }
    .ok_or_else(|| anyhow!("{} has no such version", catalog_model.name))?;
    let file = version
        .primary_file()
        .ok_or_else(|| anyhow!("{} has no primary file", version.full_name()))?;

    let engine = shelf.transfer();
    let model_job = engine.prepare(JobRequest::from_file(model_type, file)).await;
    let model_filename = model_job.final_filename();
    let model_id: JobId = engine
        .enqueue(model_job)
        .await
        .context("the model download could not be queued")?;

    let mut image_ids = Vec::new();
    if registry.settings().auto_image_download {
        for (index, image) in version.images.iter().enumerate() {
            let request = JobRequest::from_image(
                model_type,
                image,
                &model_filename,
                index as u32,
                registry.settings().image_width_limit,
            );
            match engine.submit(request).await {
                Ok(id) => image_ids.push(id),
                Err(e) => warn!("Skipping image {}: {}", index, e),
            }
        }
    }

    drive(engine).await;

    let model_snapshot = engine.snapshot(model_id).await;
    let mut images = Vec::new();
    for id in image_ids {
        if let Some(image) = engine.snapshot(id).await {
            if image.is_complete() {
                images.push(image.path());
            }
        }
    }
    engine.clear().await;

    match model_snapshot {
        Some(job) if job.is_complete() => {
            let filename = Filename::parse(&job.filename);
            let handle = registry.adopt_download(model_type, &filename, &images).await?;
            println!("Installed {}: {}", handle.key(), registry.status(&handle)?);
            Ok(())
        }
        _ => {
            for image in images {
                let _ = std::fs::remove_file(image);
            }
            bail!("the model download stopped or failed")
        }
    }
}
