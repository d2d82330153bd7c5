//! Remote catalog access.
//!
//! ```text
//! GET /models/{id}                   -> CatalogModel
//! GET /model-versions/{id}           -> CatalogVersion
//! GET /model-versions/by-hash/{hash} -> CatalogVersion
//! ```
//!
//! A 404 is a normal answer meaning "no match" and surfaces as `None`.

mod client;
mod types;

pub use client::CatalogClient;
pub use types::{
    CatalogFile, CatalogImage, CatalogModel, CatalogVersion, FileHashes, FileKind, FileMetadata,
    Nsfw,
};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::error;

static MODEL_URL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/models/(\d+)").unwrap());

/// A decoded catalog model together with the response it came from.
///
/// The raw document is what gets stored in the local catalog cache, so
/// fields this library does not model survive a round trip.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub model: CatalogModel,
    pub raw: Value,
}

/// Lookups against the remote catalog.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn model(&self, id: u64) -> Option<CatalogSnapshot>;

    async fn version(&self, id: u64) -> Option<CatalogVersion>;

    async fn version_by_hash(&self, hash: &str) -> Option<CatalogVersion>;

    /// Look up a model from a page URL such as
    /// `https://civitai.com/models/42/some-name`.
    async fn model_by_url(&self, url: &str) -> Option<CatalogSnapshot> {
        match parse_model_id(url) {
            Some(id) => self.model(id).await,
            None => {
                error!("Failed to parse model ID from url [{}]", url);
                None
            }
        }
    }

    /// Look up a model from either a bare numeric id or a page URL.
    async fn model_by_mixed(&self, url_or_id: &str) -> Option<CatalogSnapshot> {
        let trimmed = url_or_id.trim();
        match trimmed.parse::<u64>() {
            Ok(id) => self.model(id).await,
            Err(_) => self.model_by_url(trimmed).await,
        }
    }
}

/// Extract the model id from a catalog page URL.
pub fn parse_model_id(url: &str) -> Option<u64> {
    MODEL_URL_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
