//! Error types for the model shelf.
//!
//! Catalog "not found" answers are not errors: lookups return `Option::None`
//! for them. Everything that should abort an operation, or surface on a
//! transfer job, goes through [`ShelfError`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the model shelf.
#[derive(Debug, Error)]
pub enum ShelfError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout")]
    Timeout,

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to create symlink from {src} to {dest}: {reason}")]
    SymlinkFailed {
        src: PathBuf,
        dest: PathBuf,
        reason: String,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Model registry errors
    #[error("Model not found: {key}")]
    ModelNotFound { key: String },

    #[error("Model handle is no longer valid: {key}")]
    HandleDeleted { key: String },

    #[error("Model {key} is not linked to the catalog")]
    NotInCatalog { key: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    // Transfer errors
    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Image error: {message}")]
    Image { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for shelf operations.
pub type Result<T> = std::result::Result<T, ShelfError>;

impl From<std::io::Error> for ShelfError {
    fn from(err: std::io::Error) -> Self {
        ShelfError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ShelfError {
    fn from(err: serde_json::Error) -> Self {
        ShelfError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ShelfError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ShelfError::Timeout
        } else {
            ShelfError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl From<image::ImageError> for ShelfError {
    fn from(err: image::ImageError) -> Self {
        ShelfError::Image {
            message: err.to_string(),
        }
    }
}

impl ShelfError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ShelfError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Transport failures worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShelfError::Network { .. } | ShelfError::Timeout)
    }

    /// Create a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ShelfError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
