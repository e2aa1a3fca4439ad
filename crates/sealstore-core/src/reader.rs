//! Reader decrypting content of a backing store

use sealstore_crypto::{DecryptingReadableChannel, ReadableChannel, SymmetricKey};
use sealstore_store::{ContentReader, Result, StoreError};

/// Decrypts the content of a backing reader with its content key
///
/// Reports the unencrypted size recorded with the content key instead of the
/// size of the stored bytes.
pub struct DecryptingContentReader {
    delegate: Box<dyn ContentReader>,
    key: SymmetricKey,
    unencrypted_size: u64,
}

impl DecryptingContentReader {
    /// Wrap `delegate`, whose content was encrypted with `key`
    pub fn new(delegate: Box<dyn ContentReader>, key: SymmetricKey, unencrypted_size: u64) -> Self {
        Self {
            delegate,
            key,
            unencrypted_size,
        }
    }

    /// Size of the stored, encrypted bytes
    pub fn encrypted_size(&self) -> u64 {
        self.delegate.size()
    }
}

impl ContentReader for DecryptingContentReader {
    fn content_url(&self) -> &str {
        self.delegate.content_url()
    }

    fn exists(&self) -> bool {
        self.delegate.exists()
    }

    fn size(&self) -> u64 {
        self.unencrypted_size
    }

    fn channel(&self) -> Result<Box<dyn ReadableChannel>> {
        let inner = self.delegate.channel()?;
        let channel = DecryptingReadableChannel::new(inner, &self.key).map_err(|e| {
            StoreError::content_io(
                format!("Failed to initialize decryption of {}", self.content_url()),
                e,
            )
        })?;
        Ok(Box::new(channel))
    }
}
