//! Content store facade encrypting all content of a backing store

use crate::error::EncryptionError;
use crate::manager::EncryptingContentStoreManager;
use crate::reader::DecryptingContentReader;
use crate::writer::EncryptingContentWriter;
use sealstore_crypto::KeyAlgorithm;
use sealstore_store::{
    content_url, ContentContext, ContentReader, ContentStore, ContentWriter, EmptyContentReader,
    Result,
};
use std::sync::Arc;
use tracing::debug;

/// Encrypts content written to, and decrypts content read from, a backing
/// content store
///
/// Content keys are created and stored through the
/// [`EncryptingContentStoreManager`]. Content without a wrapped key is passed
/// through unchanged.
pub struct EncryptingContentStore {
    backing: Arc<dyn ContentStore>,
    manager: Arc<EncryptingContentStoreManager>,
    key_algorithm: Option<KeyAlgorithm>,
    key_size: Option<u32>,
}

impl EncryptingContentStore {
    /// Decorate `backing`, activating the manager's master keys
    pub fn new(
        backing: Arc<dyn ContentStore>,
        manager: Arc<EncryptingContentStoreManager>,
    ) -> crate::Result<Self> {
        manager.activate()?;
        let settings = manager.master_keys().settings();
        let (key_algorithm, key_size) = (settings.key_algorithm, settings.key_size);
        Ok(Self {
            backing,
            manager,
            key_algorithm,
            key_size,
        })
    }

    /// Override the algorithm and size of new content keys
    pub fn with_content_key(mut self, algorithm: KeyAlgorithm, key_size: Option<u32>) -> Self {
        self.key_algorithm = Some(algorithm);
        self.key_size = key_size;
        self
    }

    /// The content key manager
    pub fn manager(&self) -> &Arc<EncryptingContentStoreManager> {
        &self.manager
    }

    fn has_url_entity(&self, content_url: &str) -> Result<bool> {
        Ok(self.manager.content_url_entity(content_url)?.is_some())
    }
}

impl ContentStore for EncryptingContentStore {
    fn protocol(&self) -> &str {
        self.backing.protocol()
    }

    fn is_content_url_supported(&self, content_url: &str) -> bool {
        self.backing.is_content_url_supported(content_url)
    }

    fn exists(&self, content_url: &str) -> Result<bool> {
        let exists = self.backing.exists(content_url)?;
        if exists && content_url::is_wildcard(content_url) {
            let reader = self.backing.reader(content_url)?;
            return self.has_url_entity(reader.content_url());
        }
        Ok(exists)
    }

    fn reader(&self, content_url: &str) -> Result<Box<dyn ContentReader>> {
        let backing_reader = self.backing.reader(content_url)?;
        if !backing_reader.exists() {
            debug!(content_url, "Content does not exist in backing store");
            return Ok(backing_reader);
        }

        let effective_url = backing_reader.content_url().to_string();
        if content_url::is_wildcard(content_url) && !self.has_url_entity(&effective_url)? {
            debug!(
                content_url,
                effective_url = %effective_url,
                "Wildcard content has no content URL entity"
            );
            return Ok(Box::new(EmptyContentReader::new(effective_url)));
        }

        match self.manager.resolve_content_key(&effective_url)? {
            Some((key, unencrypted_size)) => {
                debug!(content_url = %effective_url, unencrypted_size, "Decrypting content");
                Ok(Box::new(DecryptingContentReader::new(
                    backing_reader,
                    key,
                    unencrypted_size,
                )))
            }
            None => {
                debug!(content_url = %effective_url, "Content is not encrypted");
                Ok(backing_reader)
            }
        }
    }

    fn writer(&self, context: &ContentContext) -> Result<Box<dyn ContentWriter>> {
        let backing_writer = self.backing.writer(context)?;
        let key = self
            .manager
            .create_encryption_key(self.key_size, self.key_algorithm)?;
        let writer = EncryptingContentWriter::new(backing_writer, key.clone());

        let manager = self.manager.clone();
        let counters = writer.counters();
        let content_url = writer.content_url().to_string();
        writer.add_listener(Box::new(move || {
            manager
                .store_encryption_key(
                    &content_url,
                    counters.unencrypted_size(),
                    counters.encrypted_size(),
                    &key,
                )
                .map_err(EncryptionError::into_io)
        }));

        Ok(Box::new(writer))
    }

    fn delete(&self, content_url: &str) -> Result<bool> {
        self.backing.delete(content_url)
    }
}
