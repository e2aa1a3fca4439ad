//! Error types for the sealstore-core crate

use sealstore_crypto::CryptoError;
use sealstore_store::StoreError;
use std::io;
use thiserror::Error;

/// Result type alias using `EncryptionError`
pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Errors raised by the encryption layer
#[derive(Error, Debug)]
pub enum EncryptionError {
    /// Missing or invalid keystore configuration, unusable key material
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cipher initialization or transform failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Stored key records disagree with the loaded master keys
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Content could not be read or written
    #[error("content io error: {message}")]
    ContentIo {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Startup validation failed
    #[error("cluster validation failed: {0}")]
    ClusterValidation(String),

    /// Administrative operation rejected its target
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A single batch entry could not be processed
    #[error("batch entry {entry} failed: {message}")]
    BatchItem { entry: String, message: String },

    /// A batch completed with failed entries
    #[error("{errors} error(s) during {process}; last error: {last_error} (entry: {last_entry})")]
    BatchFailed {
        process: String,
        errors: u64,
        last_error: String,
        last_entry: String,
    },

    /// Collaborator storage failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl EncryptionError {
    /// Build a content IO error with an optional cause
    pub fn content_io(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        EncryptionError::ContentIo {
            message: message.into(),
            source,
        }
    }

    /// Wrap into an `std::io::Error` for use inside writer listeners
    pub fn into_io(self) -> io::Error {
        match self {
            EncryptionError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

impl From<::config::ConfigError> for EncryptionError {
    fn from(e: ::config::ConfigError) -> Self {
        EncryptionError::Configuration(e.to_string())
    }
}

impl From<EncryptionError> for StoreError {
    fn from(e: EncryptionError) -> Self {
        match e {
            EncryptionError::Store(inner) => inner,
            other => StoreError::content_io(other.to_string(), other),
        }
    }
}
