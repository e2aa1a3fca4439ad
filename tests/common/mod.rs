//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use sealstore::crypto::{KdfParams, KeyAlgorithm, KeystoreBuilder, MasterKeyReference, SymmetricKey};
use sealstore::store::{ContentStore, MemoryContentStore};
use sealstore::{
    Collaborators, EncryptingContentStore, EncryptingContentStoreManager, EncryptionError, EncryptionSettings,
    KeystoreSettings, MasterKeyManager,
};
use sealstore::core::FileSystemResolver;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const KEYSTORE_ID: &str = "main";
pub const KEYSTORE_FILE: &str = "master-keys.json";
pub const PASSWORD: &str = "changeit";

pub fn key_ref(alias: &str) -> MasterKeyReference {
    MasterKeyReference::new(KEYSTORE_ID, alias)
}

/// Write a keystore of fresh AES-256 master keys under `aliases`
pub fn write_keystore(dir: &Path, aliases: &[&str]) {
    let mut builder = KeystoreBuilder::new()
        .store_password(PASSWORD)
        .kdf_params(KdfParams::new(64, 1, 1));
    for alias in aliases {
        let key = SymmetricKey::generate(KeyAlgorithm::Aes, 256).unwrap();
        builder.add_secret_key(alias, &key, PASSWORD).unwrap();
    }
    builder
        .write_to(File::create(dir.join(KEYSTORE_FILE)).unwrap())
        .unwrap();
}

/// One process using the encryption layer
pub struct Instance {
    pub backing: Arc<MemoryContentStore>,
    pub master_keys: Arc<MasterKeyManager>,
    pub manager: Arc<EncryptingContentStoreManager>,
    pub store: EncryptingContentStore,
}

impl Instance {
    /// Start an instance using `aliases` from the keystore in `dir`
    pub fn start(dir: &TempDir, aliases: &[&str], collaborators: &Collaborators) -> Self {
        Self::start_with_backing(dir, aliases, collaborators, Arc::new(MemoryContentStore::new()))
    }

    pub fn start_with_backing(
        dir: &TempDir,
        aliases: &[&str],
        collaborators: &Collaborators,
        backing: Arc<MemoryContentStore>,
    ) -> Self {
        Self::build(dir, aliases, collaborators, backing).unwrap()
    }

    /// Start an instance, returning the startup validation error if any
    pub fn try_start(
        dir: &TempDir,
        aliases: &[&str],
        collaborators: &Collaborators,
    ) -> Result<Self, EncryptionError> {
        Self::build(dir, aliases, collaborators, Arc::new(MemoryContentStore::new()))
    }

    fn build(
        dir: &TempDir,
        aliases: &[&str],
        collaborators: &Collaborators,
        backing: Arc<MemoryContentStore>,
    ) -> Result<Self, EncryptionError> {
        let settings = EncryptionSettings::default().with_keystore(
            KEYSTORE_ID,
            KeystoreSettings::new(KEYSTORE_FILE, aliases.iter().copied()).with_password(PASSWORD),
        );
        let master_keys = Arc::new(MasterKeyManager::new(
            Arc::new(settings),
            Arc::new(FileSystemResolver::with_base_dir(dir.path())),
            collaborators.clone(),
        ));
        let manager = Arc::new(EncryptingContentStoreManager::new(
            master_keys.clone(),
            collaborators,
        ));
        let store =
            EncryptingContentStore::new(backing.clone() as Arc<dyn ContentStore>, manager.clone())?;
        master_keys.on_startup()?;
        Ok(Self {
            backing,
            master_keys,
            manager,
            store,
        })
    }
}
