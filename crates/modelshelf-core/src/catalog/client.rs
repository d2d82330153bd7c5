//! Request layer for the remote catalog REST API.

use super::types::{CatalogModel, CatalogVersion};
use super::{CatalogApi, CatalogSnapshot};
use crate::network::HttpClient;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Catalog client issuing one GET per lookup.
///
/// Every call sleeps for the configured delay afterwards, whatever the
/// outcome, to stay under the catalog's rate limit. Transport failures and
/// unexpected statuses are logged and reported as "not found" so one bad
/// lookup never aborts a batch.
pub struct CatalogClient {
    http: HttpClient,
    base_url: String,
    delay: Duration,
}

impl CatalogClient {
    /// Create a client for `base_url` (e.g. `https://civitai.com/api/v1`).
    pub fn new(http: HttpClient, base_url: impl Into<String>, delay: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            delay,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Option<Value> {
        let url = format!("{}/{}", self.base_url, path);

        let json = match self.http.send_get(&url).await {
            Ok(response) if response.status().is_success() => match response.json::<Value>().await
            {
                Ok(value) => Some(value),
                Err(e) => {
                    error!("Failed to parse catalog response from {}: {}", url, e);
                    None
                }
            },
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                debug!("Catalog resource not found: {}", url);
                None
            }
            Ok(response) if HttpClient::is_retryable_status(response.status()) => {
                warn!("Catalog temporarily unavailable [{}]: {}", response.status(), url);
                None
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("Catalog request failed [{}] {}: {}", status, url, body);
                None
            }
            Err(e) => {
                error!("Catalog request failed {}: {}", url, e);
                None
            }
        };

        if !self.delay.is_zero() {
            debug!("Waiting {:?} to avoid rate limiting", self.delay);
            tokio::time::sleep(self.delay).await;
        }
        json
    }

    async fn get_typed<T: DeserializeOwned>(&self, path: &str) -> Option<(T, Value)> {
        let raw = self.get_json(path).await?;
        match serde_json::from_value(raw.clone()) {
            Ok(typed) => Some((typed, raw)),
            Err(e) => {
                error!("Unexpected catalog response shape for {}: {}", path, e);
                None
            }
        }
    }
}

#[async_trait]
impl CatalogApi for CatalogClient {
    async fn model(&self, id: u64) -> Option<CatalogSnapshot> {
        debug!("Requesting catalog model by id [{}]", id);
        let (model, raw) = self.get_typed::<CatalogModel>(&format!("models/{}", id)).await?;
        Some(CatalogSnapshot { model, raw })
    }

    async fn version(&self, id: u64) -> Option<CatalogVersion> {
        debug!("Requesting catalog version by id [{}]", id);
        self.get_typed(&format!("model-versions/{}", id))
            .await
            .map(|(version, _)| version)
    }

    async fn version_by_hash(&self, hash: &str) -> Option<CatalogVersion> {
        debug!(
            "Requesting catalog version by hash [{}]",
            crate::model_library::hashing::short_hash(hash)
        );
        self.get_typed(&format!("model-versions/by-hash/{}", hash))
            .await
            .map(|(version, _)| version)
    }
}
