//! HTTP client shared by the catalog client and the transfer engine.
//!
//! Provides a wrapper around reqwest with:
//! - A fixed user agent
//! - A connect timeout only, so multi-gigabyte bodies are never cut off
//! - Status checking that maps failures into [`ShelfError`]

use crate::config::{AppConfig, NetworkConfig};
use crate::{Result, ShelfError};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Thin wrapper around a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
    }

    /// Create a new HTTP client with a custom connect timeout.
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(AppConfig::USER_AGENT)
            .build()
            .map_err(|e| ShelfError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self { client })
    }

    /// Send a GET request and return the response whatever its status.
    pub async fn send_get(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| ShelfError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })
    }

    /// Send a GET request and fail on any non-success status.
    pub async fn get(&self, url: &str) -> Result<Response> {
        let response = self.send_get(url).await?;
        Self::check_response_status(response, url)
    }

    /// Check if an HTTP status code indicates a retryable error.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }

    fn check_response_status(response: Response, url: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(ShelfError::DownloadFailed {
            url: url.to_string(),
            message: format!("HTTP {}", status),
        })
    }
}
