//! Content key management for the encrypting content store
//!
//! Every piece of content is encrypted with its own random content key. The
//! content key is wrapped with a randomly chosen active master key and linked
//! to the content URL record together with the unencrypted content size.

use crate::batch::{BatchProcessor, BatchReport, BatchWorkProvider, BatchWorker};
use crate::collaborators::Collaborators;
use crate::error::{EncryptionError, Result};
use crate::master_keys::MasterKeyManager;
use sealstore_crypto::{unwrap_key, wrap_key, KeyAlgorithm, MasterKeyReference, SymmetricKey};
use sealstore_store::{
    in_transaction, ContentUrlEntity, ContentUrlKeyDao, ContentUrlKeyEntity, EncryptedKey,
    TransactionBoundary, TxnOptions,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Creates, stores and resolves content keys
pub struct EncryptingContentStoreManager {
    master_keys: Arc<MasterKeyManager>,
    key_dao: Arc<dyn ContentUrlKeyDao>,
    transactions: Arc<dyn TransactionBoundary>,
}

impl EncryptingContentStoreManager {
    /// Create a manager over the master keys and durable key records
    pub fn new(master_keys: Arc<MasterKeyManager>, collaborators: &Collaborators) -> Self {
        Self {
            master_keys,
            key_dao: collaborators.key_dao.clone(),
            transactions: collaborators.transactions.clone(),
        }
    }

    /// The master key manager
    pub fn master_keys(&self) -> &Arc<MasterKeyManager> {
        &self.master_keys
    }

    /// Load the master keys; see [`MasterKeyManager::activate`]
    pub fn activate(&self) -> Result<()> {
        self.master_keys.activate()
    }

    fn in_txn<T, F>(&self, options: TxnOptions, work: F) -> Result<T>
    where
        F: FnMut() -> sealstore_store::Result<T>,
    {
        Ok(in_transaction(self.transactions.as_ref(), options, work)?)
    }

    /// Generate a fresh content key
    ///
    /// Without an algorithm the configured default is used; without a size
    /// the configured default size of the default algorithm, or the default
    /// size of any other algorithm.
    pub fn create_encryption_key(
        &self,
        key_size: Option<u32>,
        algorithm: Option<KeyAlgorithm>,
    ) -> Result<SymmetricKey> {
        let settings = self.master_keys.settings();
        let algorithm = algorithm.unwrap_or(settings.default_key_algorithm);
        let key_size = key_size.unwrap_or(if algorithm == settings.default_key_algorithm {
            settings.default_key_size
        } else {
            algorithm.default_key_size()
        });
        Ok(SymmetricKey::generate(algorithm, key_size)?)
    }

    /// Record of a content URL, if any
    pub fn content_url_entity(&self, content_url: &str) -> Result<Option<ContentUrlEntity>> {
        let dao = &self.key_dao;
        self.in_txn(TxnOptions::read_only(), || dao.get_content_url(content_url))
    }

    /// Content key of `content_url`
    ///
    /// Returns `None` for content stored without encryption. Fails if the
    /// content URL has no record at all.
    pub fn get_decryption_key(&self, content_url: &str) -> Result<Option<SymmetricKey>> {
        Ok(self.resolve_content_key(content_url)?.map(|(key, _)| key))
    }

    /// Content key and unencrypted size of `content_url`
    pub(crate) fn resolve_content_key(&self, content_url: &str) -> Result<Option<(SymmetricKey, u64)>> {
        let entity = self.content_url_entity(content_url)?.ok_or_else(|| {
            EncryptionError::content_io(format!("Missing content URL entity for {content_url}"), None)
        })?;

        match entity.key {
            Some(key_entity) => {
                let key = self.unwrap_entity_key(&key_entity)?;
                debug!(content_url, key = %key_entity, "Resolved content key");
                Ok(Some((key, key_entity.unencrypted_size)))
            }
            None => {
                debug!(content_url, "Content is not encrypted");
                Ok(None)
            }
        }
    }

    /// Wrap `key` and link it to `content_url`
    ///
    /// The unencrypted size is stored with the key; the encrypted size is
    /// only logged.
    pub fn store_encryption_key(
        &self,
        content_url: &str,
        unencrypted_size: u64,
        encrypted_size: u64,
        key: &SymmetricKey,
    ) -> Result<()> {
        let encrypted_key = self.wrap_with_active_key(key)?;
        let master_key = encrypted_key.master_key.clone();

        let dao = &self.key_dao;
        let linked = self.in_txn(TxnOptions::read_write(), || {
            dao.update_content_url_key(content_url, encrypted_key.clone(), unencrypted_size)
        })?;
        if !linked {
            return Err(EncryptionError::content_io(
                format!("Failed to link content key to {content_url}"),
                None,
            ));
        }

        debug!(
            content_url,
            master_key = %master_key,
            unencrypted_size,
            encrypted_size,
            "Stored content key"
        );
        Ok(())
    }

    /// Re-wrap every content key wrapped by `master_key` with active keys
    ///
    /// `master_key` must be inactive and still able to decrypt. Fails with
    /// [`EncryptionError::BatchFailed`] if any key record could not be
    /// re-wrapped; those records keep their old wrapping.
    pub async fn re_encrypt_symmetric_keys(
        self: &Arc<Self>,
        master_key: &MasterKeyReference,
    ) -> Result<BatchReport> {
        if self.master_keys.get_active_keys().contains(master_key) {
            return Err(EncryptionError::InvalidArgument(format!(
                "Master key {master_key} must not be currently active"
            )));
        }
        if !self.master_keys.supports_decryption(master_key) {
            return Err(EncryptionError::InvalidArgument(format!(
                "Master key {master_key} is not available for decryption"
            )));
        }

        let settings = self.master_keys.settings();
        let processor = BatchProcessor::new(
            format!("re-encryption of {master_key}"),
            settings.re_encryption_thread_count,
        )
        .with_log_interval(settings.re_encryption_log_interval);

        let provider = ReEncryptionWorkProvider {
            manager: self.clone(),
            master_key: master_key.clone(),
            last_id: None,
            page_size: settings.re_encryption_batch_size,
        };
        let worker = Arc::new(ReEncryptionWorker {
            manager: self.clone(),
        });

        let report = processor.process(provider, worker).await?;
        info!(
            master_key = %master_key,
            processed = report.processed,
            errors = report.errors,
            "Re-encrypted content keys"
        );
        report.into_result()
    }

    fn unwrap_entity_key(&self, entity: &ContentUrlKeyEntity) -> Result<SymmetricKey> {
        let encrypted_key = &entity.encrypted_key;
        let master_key = self
            .master_keys
            .get_decryption_key(&encrypted_key.master_key)
            .ok_or_else(|| {
                EncryptionError::Consistency(format!(
                    "No decryption key available for master key {} used by {entity}",
                    encrypted_key.master_key
                ))
            })?;

        unwrap_key(&master_key, encrypted_key.algorithm, &encrypted_key.bytes).map_err(|e| {
            EncryptionError::content_io(
                format!("Failed to unwrap content key of {entity}"),
                Some(Box::new(e)),
            )
        })
    }

    fn wrap_with_active_key(&self, key: &SymmetricKey) -> Result<EncryptedKey> {
        let (master_key, material) = self.master_keys.get_random_active_encryption_key()?;
        let bytes = wrap_key(&material, key)?;
        Ok(EncryptedKey {
            master_key,
            algorithm: key.algorithm(),
            bytes,
        })
    }

    fn re_encrypt_key_entity(&self, entity: &ContentUrlKeyEntity) -> Result<()> {
        let key = self.unwrap_entity_key(entity)?;
        let updated = ContentUrlKeyEntity {
            encrypted_key: self.wrap_with_active_key(&key)?,
            ..entity.clone()
        };

        let dao = &self.key_dao;
        let stored = self.in_txn(TxnOptions::read_write(), || dao.update_key_entity(&updated))?;
        if !stored {
            return Err(EncryptionError::BatchItem {
                entry: entity.to_string(),
                message: "key record was deleted or replaced concurrently".to_string(),
            });
        }

        debug!(
            key = %entity,
            master_key = %updated.encrypted_key.master_key,
            "Re-encrypted content key"
        );
        Ok(())
    }
}

struct ReEncryptionWorkProvider {
    manager: Arc<EncryptingContentStoreManager>,
    master_key: MasterKeyReference,
    last_id: Option<u64>,
    page_size: usize,
}

impl BatchWorkProvider<ContentUrlKeyEntity> for ReEncryptionWorkProvider {
    fn total_estimated_work(&mut self) -> Result<u64> {
        self.manager
            .master_keys
            .count_encrypted_symmetric_keys_for(&self.master_key)
    }

    fn next_page(&mut self) -> Result<Vec<ContentUrlKeyEntity>> {
        let dao = &self.manager.key_dao;
        let (master_key, from_id, page_size) = (&self.master_key, self.last_id, self.page_size);
        let page = self.manager.in_txn(TxnOptions::read_only(), || {
            dao.get_symmetric_keys(master_key, from_id, page_size)
        })?;
        if let Some(last) = page.last() {
            self.last_id = Some(last.id);
        }
        Ok(page)
    }
}

struct ReEncryptionWorker {
    manager: Arc<EncryptingContentStoreManager>,
}

impl BatchWorker<ContentUrlKeyEntity> for ReEncryptionWorker {
    fn identifier(&self, entry: &ContentUrlKeyEntity) -> String {
        entry.to_string()
    }

    fn process(&self, entry: &ContentUrlKeyEntity) -> Result<()> {
        self.manager.re_encrypt_key_entity(entry)
    }
}
