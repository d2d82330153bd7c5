//! Catalog response shapes.
//!
//! Fields the library does not use are ignored on decode. Missing lists
//! decode as empty so partially populated responses still parse.

use crate::config::NetworkConfig;
use crate::model_library::hashing::hashes_match;
use crate::model_library::ModelType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static WIDTH_SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/width=\d+").unwrap());

/// A catalog model with its versions, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogModel {
    pub id: u64,
    pub name: String,
    /// Catalog type name, e.g. `Checkpoint` or `LORA`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub model_versions: Vec<CatalogVersion>,
}

impl CatalogModel {
    /// Local type for the catalog type, if it is one the library handles.
    pub fn model_type(&self) -> Option<ModelType> {
        ModelType::from_catalog_name(&self.kind)
    }

    /// Version at index 0.
    pub fn latest_version(&self) -> Option<&CatalogVersion> {
        self.model_versions.first()
    }

    pub fn version(&self, id: u64) -> Option<&CatalogVersion> {
        self.model_versions.iter().find(|v| v.id == id)
    }

    /// Version owning a file with `hash`.
    pub fn version_with_hash(&self, hash: &str) -> Option<&CatalogVersion> {
        self.model_versions.iter().find(|v| v.file_with_hash(hash).is_some())
    }

    /// Whether any file of any version has `hash`.
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.version_with_hash(hash).is_some()
    }

    pub fn url(&self) -> String {
        format!("{}/{}", NetworkConfig::CATALOG_WEB_BASE, self.id)
    }
}

/// One released version of a catalog model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogVersion {
    pub id: u64,
    pub model_id: u64,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub trained_words: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: Vec<CatalogFile>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<CatalogImage>,
}

impl CatalogVersion {
    pub fn full_name(&self) -> String {
        format!("{} [{}]", self.name, self.id)
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}?modelVersionId={}",
            NetworkConfig::CATALOG_WEB_BASE,
            self.model_id,
            self.id
        )
    }

    pub fn primary_file(&self) -> Option<&CatalogFile> {
        self.files.iter().find(|f| f.primary)
    }

    /// The optional companion (VAE) file shipped with this version.
    pub fn companion_file(&self) -> Option<&CatalogFile> {
        self.files.iter().find(|f| f.is_companion())
    }

    pub fn file_with_hash(&self, hash: &str) -> Option<&CatalogFile> {
        self.files
            .iter()
            .find(|f| f.sha256().is_some_and(|h| hashes_match(h, hash)))
    }
}

/// Role of a file within a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Model,
    #[serde(rename = "VAE")]
    Vae,
    Config,
    Negative,
    #[serde(rename = "Pruned Model")]
    PrunedModel,
    #[serde(rename = "Training Data")]
    TrainingData,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub fp: Option<String>,
    pub size: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileHashes {
    #[serde(rename = "SHA256")]
    pub sha256: Option<String>,
    #[serde(rename = "AutoV2")]
    pub auto_v2: Option<String>,
}

/// A downloadable file of a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    pub id: u64,
    pub name: String,
    #[serde(rename = "sizeKB", default)]
    pub size_kb: f64,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: FileMetadata,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hashes: FileHashes,
    pub download_url: String,
    #[serde(default)]
    pub primary: bool,
}

impl CatalogFile {
    pub fn full_name(&self) -> String {
        format!("{} [{}]", self.name, self.id)
    }

    pub fn sha256(&self) -> Option<&str> {
        self.hashes.sha256.as_deref().filter(|h| !h.is_empty())
    }

    pub fn auto_v2(&self) -> Option<&str> {
        self.hashes.auto_v2.as_deref().filter(|h| !h.is_empty())
    }

    /// A non-primary VAE file.
    pub fn is_companion(&self) -> bool {
        self.kind == FileKind::Vae && !self.primary
    }

    /// Size class, precision and format, e.g. `Pruned fp16 SafeTensor`.
    pub fn description(&self) -> String {
        let size = self.metadata.size.as_deref().map(capitalize);
        [size, self.metadata.fp.clone(), self.metadata.format.clone()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Content classification of a catalog image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nsfw {
    #[default]
    None,
    Soft,
    Mature,
    X,
    #[serde(other)]
    Unknown,
}

/// A showcase image of a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogImage {
    pub url: String,
    #[serde(default)]
    pub nsfw: Nsfw,
    #[serde(default)]
    pub hash: Option<String>,
}

impl CatalogImage {
    /// Only images classified `None` are safe. Unknown classes are not.
    pub fn is_safe(&self) -> bool {
        self.nsfw == Nsfw::None
    }

    /// URL without the catalog's `/width=N` limit.
    pub fn raw_url(&self) -> String {
        WIDTH_SEGMENT.replace_all(&self.url, "").into_owned()
    }

    /// URL to download, honoring the width-limit setting.
    pub fn download_url(&self, width_limit: bool) -> String {
        if width_limit {
            self.url.clone()
        } else {
            self.raw_url()
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_model() -> serde_json::Value {
        json!({
            "id": 42,
            "name": "Dreamy",
            "type": "Checkpoint",
            "nsfw": false,
            "tags": ["anime", "base model"],
            "modelVersions": [
                {
                    "id": 1002,
                    "modelId": 42,
                    "name": "v2",
                    "trainedWords": ["dreamy style"],
                    "files": [
                        {
                            "id": 9,
                            "name": "dreamy_v2.safetensors",
                            "sizeKB": 2048.0,
                            "type": "Model",
                            "metadata": {"fp": "fp16", "size": "pruned", "format": "SafeTensor"},
                            "hashes": {"SHA256": "aa11", "AutoV2": "AA"},
                            "downloadUrl": "https://example.invalid/9",
                            "primary": true
                        },
                        {
                            "id": 10,
                            "name": "dreamy.vae.pt",
                            "sizeKB": 300.0,
                            "type": "VAE",
                            "metadata": {"fp": null, "size": null, "format": "Other"},
                            "hashes": {"SHA256": "BB22"},
                            "downloadUrl": "https://example.invalid/10"
                        }
                    ],
                    "images": [
                        {"url": "https://img.invalid/x/width=450/1.jpeg", "nsfw": "Soft", "hash": "h"},
                        {"url": "https://img.invalid/x/width=450/2.jpeg", "nsfw": "None", "hash": "h"}
                    ]
                },
                {"id": 1001, "modelId": 42, "name": "v1", "trainedWords": null, "files": [], "images": []}
            ]
        })
    }

    #[test]
    fn test_decode_model() {
        let model: CatalogModel = serde_json::from_value(sample_model()).unwrap();
        assert_eq!(model.model_type(), Some(ModelType::Checkpoint));
        assert_eq!(model.latest_version().unwrap().id, 1002);
        assert_eq!(model.url(), "https://civitai.com/models/42");
        assert!(model.version(1001).unwrap().trained_words.is_empty());

        let version = model.latest_version().unwrap();
        assert_eq!(version.primary_file().unwrap().id, 9);
        assert_eq!(version.companion_file().unwrap().id, 10);
        assert_eq!(version.url(), "https://civitai.com/models/42?modelVersionId=1002");
        assert_eq!(version.primary_file().unwrap().description(), "Pruned fp16 SafeTensor");
    }

    #[test]
    fn test_hash_lookup_ignores_case() {
        let model: CatalogModel = serde_json::from_value(sample_model()).unwrap();
        assert!(model.contains_hash("AA11"));
        assert_eq!(model.version_with_hash("bb22").unwrap().id, 1002);
        assert!(!model.contains_hash("CC33"));
    }

    #[test]
    fn test_unknown_kinds_decode() {
        let file: CatalogFile = serde_json::from_value(json!({
            "id": 1, "name": "x", "type": "Archive", "downloadUrl": "u",
            "metadata": null, "hashes": null
        }))
        .unwrap();
        assert_eq!(file.kind, FileKind::Other);
        assert!(file.sha256().is_none());

        let image: CatalogImage =
            serde_json::from_value(json!({"url": "u", "nsfw": "Extreme"})).unwrap();
        assert_eq!(image.nsfw, Nsfw::Unknown);
        assert!(!image.is_safe());
    }

    #[test]
    fn test_raw_url_strips_width() {
        let image = CatalogImage {
            url: "https://img.invalid/abc/width=450/1.jpeg".into(),
            nsfw: Nsfw::None,
            hash: None,
        };
        assert_eq!(image.raw_url(), "https://img.invalid/abc/1.jpeg");
        assert_eq!(image.download_url(true), image.url);
        assert_eq!(image.download_url(false), image.raw_url());
    }

    #[test]
    fn test_primary_vae_is_not_companion() {
        let file: CatalogFile = serde_json::from_value(json!({
            "id": 1, "name": "x.pt", "type": "VAE", "downloadUrl": "u", "primary": true
        }))
        .unwrap();
        assert!(!file.is_companion());
    }
}
