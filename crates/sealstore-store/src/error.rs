//! Error types for the sealstore-store crate

use thiserror::Error;

/// Result type alias using `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in content stores and their collaborators
#[derive(Error, Debug)]
pub enum StoreError {
    /// Content not found
    #[error("content not found: {0}")]
    NotFound(String),

    /// Content already exists
    #[error("content already exists: {0}")]
    AlreadyExists(String),

    /// Malformed content URL
    #[error("invalid content URL: {0}")]
    InvalidContentUrl(String),

    /// Content URL belongs to a different store
    #[error("content URL not supported by this store: {0}")]
    UnsupportedContentUrl(String),

    /// Concurrent modification; safe to retry
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// Operation not valid in the current state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Content could not be read or written
    #[error("content io error: {message}")]
    ContentIo {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Content IO failure with an underlying cause
    pub fn content_io(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::ContentIo {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Whether a transaction boundary may retry the failed unit of work
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
