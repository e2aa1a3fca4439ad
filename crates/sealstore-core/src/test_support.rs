//! Fixtures shared by the unit tests of this crate

use crate::collaborators::Collaborators;
use crate::config::{EncryptionSettings, KeystoreSettings};
use crate::manager::EncryptingContentStoreManager;
use crate::master_keys::MasterKeyManager;
use crate::resource::MemoryResolver;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sealstore_crypto::{KdfParams, KeyAlgorithm, KeystoreBuilder, MasterKeyReference, SymmetricKey};
use std::sync::Arc;

pub(crate) const KEYSTORE_ID: &str = "main";
pub(crate) const KEYSTORE_LOCATION: &str = "main.json";
pub(crate) const STORE_PASSWORD: &str = "store-secret";

pub(crate) fn key_ref(alias: &str) -> MasterKeyReference {
    MasterKeyReference::new(KEYSTORE_ID, alias)
}

pub(crate) fn aes_key() -> SymmetricKey {
    SymmetricKey::generate(KeyAlgorithm::Aes, 256).unwrap()
}

pub(crate) fn keystore(keys: &[(&str, &SymmetricKey)]) -> Vec<u8> {
    let mut builder = KeystoreBuilder::new()
        .store_password(STORE_PASSWORD)
        .kdf_params(KdfParams::new(64, 1, 1));
    for (alias, key) in keys {
        builder.add_secret_key(alias, key, STORE_PASSWORD).unwrap();
    }
    builder.to_bytes().unwrap()
}

pub(crate) fn aes_keystore(aliases: &[&str]) -> Vec<u8> {
    let keys: Vec<(&str, SymmetricKey)> = aliases.iter().map(|alias| (*alias, aes_key())).collect();
    let refs: Vec<(&str, &SymmetricKey)> = keys.iter().map(|(alias, key)| (*alias, key)).collect();
    keystore(&refs)
}

pub(crate) fn settings(aliases: &[&str]) -> EncryptionSettings {
    EncryptionSettings::default().with_keystore(
        KEYSTORE_ID,
        KeystoreSettings::new(KEYSTORE_LOCATION, aliases.iter().copied()).with_password(STORE_PASSWORD),
    )
}

/// One instance of the encryption layer
pub(crate) struct Node {
    pub resolver: Arc<MemoryResolver>,
    pub settings: Arc<EncryptionSettings>,
    pub collaborators: Collaborators,
    pub master_keys: Arc<MasterKeyManager>,
}

impl Node {
    pub fn new(aliases: &[&str]) -> Self {
        Self::with_keystore(aes_keystore(aliases), aliases)
    }

    pub fn with_keystore(keystore: Vec<u8>, aliases: &[&str]) -> Self {
        Self::build(keystore, settings(aliases), Collaborators::in_memory(), 7)
    }

    pub fn with_settings(settings: EncryptionSettings) -> Self {
        Self::build(aes_keystore(&["a", "b"]), settings, Collaborators::in_memory(), 7)
    }

    pub fn build(
        keystore: Vec<u8>,
        settings: EncryptionSettings,
        collaborators: Collaborators,
        seed: u64,
    ) -> Self {
        let resolver = Arc::new(MemoryResolver::new());
        resolver.insert(KEYSTORE_LOCATION, keystore);
        Self::assemble(resolver, Arc::new(settings), collaborators, seed)
    }

    pub fn started(aliases: &[&str]) -> Self {
        Self::started_with_seed(aliases, 7)
    }

    pub fn started_with_seed(aliases: &[&str], seed: u64) -> Self {
        let node = Self::build(aes_keystore(aliases), settings(aliases), Collaborators::in_memory(), seed);
        node.start();
        node
    }

    pub fn start(&self) {
        self.master_keys.activate().unwrap();
        self.master_keys.on_startup().unwrap();
    }

    /// Another instance with the same keys, database and cluster
    pub fn peer(&self) -> Self {
        Self::assemble(
            self.resolver.clone(),
            self.settings.clone(),
            self.collaborators.clone(),
            11,
        )
    }

    /// The same instance after a restart of the whole cluster
    pub fn restarted_with_fresh_cluster(&self) -> Self {
        Self::assemble(
            self.resolver.clone(),
            self.settings.clone(),
            self.collaborators.with_separate_caches(),
            13,
        )
    }

    pub fn store_manager(&self) -> Arc<EncryptingContentStoreManager> {
        Arc::new(EncryptingContentStoreManager::new(
            self.master_keys.clone(),
            &self.collaborators,
        ))
    }

    fn assemble(
        resolver: Arc<MemoryResolver>,
        settings: Arc<EncryptionSettings>,
        collaborators: Collaborators,
        seed: u64,
    ) -> Self {
        let master_keys = Arc::new(
            MasterKeyManager::new(settings.clone(), resolver.clone(), collaborators.clone())
                .with_rng(StdRng::seed_from_u64(seed)),
        );
        Self {
            resolver,
            settings,
            collaborators,
            master_keys,
        }
    }
}
