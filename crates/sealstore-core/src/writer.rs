//! Writer encrypting content on its way to a backing store

use crate::reader::DecryptingContentReader;
use sealstore_crypto::{EncryptingWritableChannel, SymmetricKey, WritableChannel};
use sealstore_store::{ContentReader, ContentWriter, EmptyContentReader, Result, StoreError, WriteListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Byte counts of an encrypting writer
#[derive(Debug, Default)]
pub struct WriteCounters {
    unencrypted: AtomicU64,
    encrypted: AtomicU64,
    completed: AtomicBool,
}

impl WriteCounters {
    /// Plaintext bytes written
    pub fn unencrypted_size(&self) -> u64 {
        self.unencrypted.load(Ordering::SeqCst)
    }

    /// Ciphertext bytes written to the backing channel
    pub fn encrypted_size(&self) -> u64 {
        self.encrypted.load(Ordering::SeqCst)
    }

    /// Whether the backing writer has been closed
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Encrypts everything written with a content key before it reaches the
/// backing writer
pub struct EncryptingContentWriter {
    delegate: Box<dyn ContentWriter>,
    key: SymmetricKey,
    counters: Arc<WriteCounters>,
}

impl EncryptingContentWriter {
    /// Wrap `delegate`, encrypting with `key`
    pub fn new(delegate: Box<dyn ContentWriter>, key: SymmetricKey) -> Self {
        let counters = Arc::new(WriteCounters::default());
        let completion = counters.clone();
        let content_url = delegate.content_url().to_string();
        delegate.add_listener(Box::new(move || {
            completion.completed.store(true, Ordering::SeqCst);
            debug!(
                content_url = %content_url,
                unencrypted_size = completion.unencrypted_size(),
                encrypted_size = completion.encrypted_size(),
                "Completed encrypted write"
            );
            Ok(())
        }));

        Self {
            delegate,
            key,
            counters,
        }
    }

    /// Byte counts shared with listeners
    pub fn counters(&self) -> Arc<WriteCounters> {
        self.counters.clone()
    }
}

impl ContentWriter for EncryptingContentWriter {
    fn content_url(&self) -> &str {
        self.delegate.content_url()
    }

    fn channel(&self) -> Result<Box<dyn WritableChannel>> {
        let inner = self.delegate.channel()?;
        let mut channel = EncryptingWritableChannel::new(inner, &self.key).map_err(|e| {
            StoreError::content_io(
                format!("Failed to initialize encryption of {}", self.content_url()),
                e,
            )
        })?;

        let counters = self.counters.clone();
        channel.add_listener(move |unencrypted, encrypted| {
            counters
                .unencrypted
                .fetch_add(unencrypted as u64, Ordering::SeqCst);
            counters
                .encrypted
                .fetch_add(encrypted as u64, Ordering::SeqCst);
        });
        Ok(Box::new(channel))
    }

    fn add_listener(&self, listener: WriteListener) {
        self.delegate.add_listener(listener);
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }

    fn size(&self) -> u64 {
        if self.counters.is_completed() {
            self.counters.unencrypted_size()
        } else {
            self.delegate.size()
        }
    }

    fn reader(&self) -> Result<Box<dyn ContentReader>> {
        if !self.counters.is_completed() {
            return Ok(Box::new(EmptyContentReader::new(self.content_url())));
        }
        Ok(Box::new(DecryptingContentReader::new(
            self.delegate.reader()?,
            self.key.clone(),
            self.counters.unencrypted_size(),
        )))
    }
}
