//! # Sealstore Store
//!
//! Content store abstractions the Sealstore encryption layer decorates and
//! depends on.
//!
//! This crate provides:
//! - **Content stores**: readers and writers over byte channels, addressed by content URLs
//! - **Key records**: durable mapping of content URLs to wrapped content keys
//! - **Attributes**: durable hierarchical key/value settings
//! - **Cluster caches**: associative caches shared by cooperating instances
//! - **Transactions**: a retryable unit-of-work boundary
//!
//! Every collaborator has a thread-safe in-memory implementation for tests and
//! embedders.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Encrypting Store Facade          │
//! ├─────────────────────────────────────────┤
//! │           ContentStore Trait            │
//! ├────────────────────┬────────────────────┤
//! │ MemoryContentStore │   (host stores)    │
//! └────────────────────┴────────────────────┘
//! ```

pub mod attributes;
pub mod cache;
pub mod content_url;
pub mod error;
pub mod key_records;
pub mod memory;
pub mod transaction;

pub use attributes::{AttributeStore, MemoryAttributeStore};
pub use cache::{MemoryCache, SharedCache};
pub use content_url::WILDCARD_PROTOCOL;
pub use error::{Result, StoreError};
pub use key_records::{
    ContentUrlEntity, ContentUrlKeyDao, ContentUrlKeyEntity, EncryptedKey, MemoryContentUrlKeyDao,
};
pub use memory::MemoryContentStore;
pub use transaction::{in_transaction, RetryingTransactionHelper, TransactionBoundary, TxnOptions};

use sealstore_crypto::{ReadableChannel, WritableChannel};
use std::io::{self, Read, Write};

/// Callback run once a writer's channel has been closed
pub type WriteListener = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// Parameters for obtaining a writer
#[derive(Clone, Debug, Default)]
pub struct ContentContext {
    content_url: Option<String>,
}

impl ContentContext {
    /// Context for new content at a store-chosen URL
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for content at a caller-chosen URL
    pub fn with_content_url(content_url: impl Into<String>) -> Self {
        Self {
            content_url: Some(content_url.into()),
        }
    }

    /// Requested content URL, if any
    pub fn content_url(&self) -> Option<&str> {
        self.content_url.as_deref()
    }
}

/// Read access to one piece of content
pub trait ContentReader: Send + Sync {
    /// The effective content URL, after any wildcard resolution
    fn content_url(&self) -> &str;

    /// Whether the content exists
    fn exists(&self) -> bool;

    /// Size of the content in bytes
    fn size(&self) -> u64;

    /// Open a channel over the content
    fn channel(&self) -> Result<Box<dyn ReadableChannel>>;

    /// Read the complete content into memory
    fn content_bytes(&self) -> Result<Vec<u8>> {
        let mut channel = self.channel()?;
        let mut bytes = Vec::with_capacity(self.size() as usize);
        channel.read_to_end(&mut bytes)?;
        channel.close()?;
        Ok(bytes)
    }
}

/// Write access to one piece of content
pub trait ContentWriter: Send + Sync {
    /// Content URL the writer stores to
    fn content_url(&self) -> &str;

    /// Open the channel to write through; only one channel may be obtained
    fn channel(&self) -> Result<Box<dyn WritableChannel>>;

    /// Register a callback run after the channel is closed, in registration order
    fn add_listener(&self, listener: WriteListener);

    /// Whether the channel has been closed and the content committed
    fn is_closed(&self) -> bool;

    /// Number of bytes written so far
    fn size(&self) -> u64;

    /// Reader over the written content; empty until the writer is closed
    fn reader(&self) -> Result<Box<dyn ContentReader>>;

    /// Write `bytes` as the complete content and close the channel
    fn put_content(&self, bytes: &[u8]) -> Result<()> {
        let mut channel = self.channel()?;
        channel.write_all(bytes)?;
        channel.close()?;
        Ok(())
    }
}

/// A store of content addressed by content URLs
pub trait ContentStore: Send + Sync {
    /// Protocol of URLs created by this store
    fn protocol(&self) -> &str;

    /// Whether this store handles `content_url`
    fn is_content_url_supported(&self, content_url: &str) -> bool {
        match content_url::split(content_url) {
            Ok((protocol, _)) => protocol == self.protocol() || protocol == WILDCARD_PROTOCOL,
            Err(_) => false,
        }
    }

    /// Whether content exists at `content_url`
    fn exists(&self, content_url: &str) -> Result<bool>;

    /// Obtain a reader; for absent content the reader reports `exists() == false`
    fn reader(&self, content_url: &str) -> Result<Box<dyn ContentReader>>;

    /// Obtain a writer for new content
    fn writer(&self, context: &ContentContext) -> Result<Box<dyn ContentWriter>>;

    /// Delete content, returning whether anything was removed
    fn delete(&self, content_url: &str) -> Result<bool>;
}

/// Reader for content that does not exist
#[derive(Clone, Debug)]
pub struct EmptyContentReader {
    content_url: String,
}

impl EmptyContentReader {
    /// Create an empty reader for `content_url`
    pub fn new(content_url: impl Into<String>) -> Self {
        Self {
            content_url: content_url.into(),
        }
    }
}

impl ContentReader for EmptyContentReader {
    fn content_url(&self) -> &str {
        &self.content_url
    }

    fn exists(&self) -> bool {
        false
    }

    fn size(&self) -> u64 {
        0
    }

    fn channel(&self) -> Result<Box<dyn ReadableChannel>> {
        Err(StoreError::NotFound(self.content_url.clone()))
    }
}
