//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use modelshelf_core::catalog::{CatalogApi, CatalogSnapshot, CatalogVersion};
use modelshelf_core::{CatalogModel, ModelShelf, ModelType, Settings};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Create an empty library root.
pub fn create_test_env() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

/// In-memory catalog that counts every request.
#[derive(Default)]
pub struct MockCatalog {
    models: HashMap<u64, Value>,
    calls: AtomicUsize,
}

impl MockCatalog {
    pub fn with_model(mut self, raw: Value) -> Self {
        let id = raw["id"].as_u64().expect("model id");
        self.models.insert(id, raw);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn decoded(&self) -> Vec<CatalogModel> {
        self.models
            .values()
            .filter_map(|raw| serde_json::from_value(raw.clone()).ok())
            .collect()
    }
}

#[async_trait]
impl CatalogApi for MockCatalog {
    async fn model(&self, id: u64) -> Option<CatalogSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = self.models.get(&id)?.clone();
        let model = serde_json::from_value(raw.clone()).ok()?;
        Some(CatalogSnapshot { model, raw })
    }

    async fn version(&self, id: u64) -> Option<CatalogVersion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decoded()
            .into_iter()
            .flat_map(|m| m.model_versions)
            .find(|v| v.id == id)
    }

    async fn version_by_hash(&self, hash: &str) -> Option<CatalogVersion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decoded()
            .into_iter()
            .flat_map(|m| m.model_versions)
            .find(|v| v.file_with_hash(hash).is_some())
    }
}

/// Open a shelf over `root` with a mock catalog.
pub fn open_shelf(root: &Path, catalog: Arc<MockCatalog>, settings: Settings) -> ModelShelf {
    ModelShelf::builder(root)
        .auto_create_dirs(true)
        .settings(settings)
        .catalog(catalog)
        .build()
        .expect("Failed to open shelf")
}

/// Write a model file into the type's default directory.
pub fn write_model(root: &Path, model_type: ModelType, name: &str, content: &[u8]) -> PathBuf {
    let dir = root.join(model_type.default_subdir());
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Write a small PNG.
pub fn write_png(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    image::RgbaImage::from_pixel(4, 4, image::Rgba([200, 10, 10, 255]))
        .save(path)
        .unwrap();
}

/// Store a catalog snapshot in the library's local catalog cache.
pub fn store_snapshot(root: &Path, raw: &Value) {
    let dir = root.join("database");
    std::fs::create_dir_all(&dir).unwrap();
    let id = raw["id"].as_u64().expect("model id");
    std::fs::write(dir.join(format!("{}.json", id)), serde_json::to_vec(raw).unwrap()).unwrap();
}

/// Upper-case SHA256 of some bytes.
pub fn sha256(content: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(content))
}

/// Files left behind by interrupted downloads.
pub fn partial_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.to_string_lossy().ends_with(".part"))
        .collect()
}

// ========================================
// Catalog documents
// ========================================

pub fn model_json(id: u64, name: &str, kind: &str, versions: Vec<Value>) -> Value {
    json!({
        "id": id,
        "name": name,
        "type": kind,
        "nsfw": false,
        "tags": ["fantasy", "architecture"],
        "modelVersions": versions,
    })
}

pub fn version_json(id: u64, model_id: u64, files: Vec<Value>, images: Vec<Value>) -> Value {
    json!({
        "id": id,
        "modelId": model_id,
        "name": format!("v{}", id),
        "trainedWords": ["castle style"],
        "files": files,
        "images": images,
    })
}

pub fn file_json(id: u64, name: &str, kind: &str, hash: &str, primary: bool, url: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "sizeKB": 4.0,
        "type": kind,
        "metadata": {"fp": "fp16", "size": "pruned", "format": "SafeTensor"},
        "hashes": {"SHA256": hash, "AutoV2": &hash[..10]},
        "downloadUrl": url,
        "primary": primary,
    })
}

pub fn image_json(url: &str, nsfw: &str) -> Value {
    json!({"url": url, "nsfw": nsfw, "hash": "L00000"})
}
