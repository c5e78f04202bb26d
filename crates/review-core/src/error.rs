//! Error types for the review session engine

use thiserror::Error;

/// Main error type for all review operations
#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Step '{step}' is not ready: {reason}")]
    Validation { step: String, reason: String },

    #[error("Save failed: {0}")]
    Save(String),

    #[error("Review cannot be completed: {0}")]
    Completion(String),

    #[error("Cancellation failed: {0}")]
    Cancellation(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Gateway error: {0}")]
    Gateway(String),
}

impl ReviewError {
    /// Whether the error came from a local check rather than the gateway
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::InvalidState(_) | Self::Config(_)
        )
    }
}

/// Result type for review operations
pub type Result<T> = std::result::Result<T, ReviewError>;
