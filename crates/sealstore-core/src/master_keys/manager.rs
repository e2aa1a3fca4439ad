//! Master key loading, state and administration

use super::{CHECK_VALUES_ATTRIBUTE, DISABLED_MASTER_KEYS_ATTRIBUTE};
use crate::collaborators::{ClusterCaches, Collaborators};
use crate::config::EncryptionSettings;
use crate::error::{EncryptionError, Result};
use crate::resource::ResourceResolver;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use sealstore_crypto::{CryptoError, KeyAlgorithm, Keystore, MasterKey, MasterKeyReference};
use sealstore_store::{in_transaction, TxnOptions};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Loaded key material
#[derive(Default)]
pub(super) struct KeyState {
    pub(super) aliases: BTreeMap<String, Vec<String>>,
    pub(super) check_values: HashMap<MasterKeyReference, String>,
    pub(super) encryption_keys: HashMap<MasterKeyReference, MasterKey>,
    pub(super) decryption_keys: HashMap<MasterKeyReference, MasterKey>,
}

impl KeyState {
    fn active_keys(&self, caches: &ClusterCaches) -> BTreeSet<MasterKeyReference> {
        self.encryption_keys
            .keys()
            .filter(|r| !caches.blocked.contains(r) && !caches.disabled.contains(r))
            .cloned()
            .collect()
    }

    fn disabled_keys(&self, caches: &ClusterCaches) -> BTreeSet<MasterKeyReference> {
        self.encryption_keys
            .keys()
            .filter(|r| !caches.blocked.contains(r) && caches.disabled.contains(r))
            .cloned()
            .collect()
    }

    fn is_known(&self, reference: &MasterKeyReference, caches: &ClusterCaches) -> bool {
        self.check_values.contains_key(reference) && caches.check_values.contains(reference)
    }
}

/// Manages the master keys of one instance
pub struct MasterKeyManager {
    settings: Arc<EncryptionSettings>,
    resolver: Arc<dyn ResourceResolver>,
    pub(super) collaborators: Collaborators,
    pub(super) state: RwLock<KeyState>,
    pub(super) validated: Mutex<bool>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl MasterKeyManager {
    /// Create a manager; no keys are loaded until [`activate`](Self::activate)
    pub fn new(
        settings: Arc<EncryptionSettings>,
        resolver: Arc<dyn ResourceResolver>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            settings,
            resolver,
            collaborators,
            state: RwLock::new(KeyState::default()),
            validated: Mutex::new(false),
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
        }
    }

    /// Replace the random source used to pick active keys
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Mutex::new(Box::new(rng));
        self
    }

    /// Settings the manager was created with
    pub fn settings(&self) -> &EncryptionSettings {
        &self.settings
    }

    /// Load all configured master keys
    ///
    /// Idempotent: once keys are loaded further calls return immediately.
    /// Fails if configuration, keystores or key material are unusable, or if
    /// no key could be loaded at all.
    pub fn activate(&self) -> Result<()> {
        let mut state = self.state.write();
        if !state.check_values.is_empty() {
            return Ok(());
        }

        self.settings.validate()?;
        self.load_disabled_markers()?;

        let mut loaded = KeyState::default();
        for keystore_id in &self.settings.keystore_ids {
            self.load_keystore(&mut loaded, keystore_id)?;
        }

        if loaded.check_values.is_empty() {
            return Err(EncryptionError::Configuration(
                "none of the configured master keys could be loaded".to_string(),
            ));
        }

        info!(
            keys = loaded.check_values.len(),
            encryption = loaded.encryption_keys.len(),
            decryption = loaded.decryption_keys.len(),
            "Activated master keys"
        );
        *state = loaded;
        Ok(())
    }

    /// Whether master keys have been loaded
    pub fn has_been_activated(&self) -> bool {
        !self.state.read().check_values.is_empty()
    }

    fn load_disabled_markers(&self) -> Result<()> {
        let attributes = &self.collaborators.attributes;
        let markers = self.in_txn(TxnOptions::read_only(), || {
            attributes.get_attributes(&[DISABLED_MASTER_KEYS_ATTRIBUTE])
        })?;

        for (keys, value) in markers {
            if let [_, keystore_id, alias] = keys.as_slice() {
                if value == Value::Bool(true) {
                    let reference = MasterKeyReference::new(keystore_id.as_str(), alias.as_str());
                    debug!(master_key = %reference, "Master key is disabled");
                    self.collaborators.caches.disabled.put(reference, true);
                }
            }
        }
        Ok(())
    }

    fn load_keystore(&self, state: &mut KeyState, keystore_id: &str) -> Result<()> {
        let settings = self.settings.keystore(keystore_id)?;
        let reader = self.resolver.open(&settings.location)?.ok_or_else(|| {
            EncryptionError::Configuration(format!(
                "keystore {keystore_id} does not exist at {}",
                settings.location
            ))
        })?;

        let store_password = settings.store_password(keystore_id, self.resolver.as_ref());
        let keystore = Keystore::load(reader, store_password.as_deref()).map_err(|e| {
            EncryptionError::Configuration(format!("failed to load keystore {keystore_id}: {e}"))
        })?;
        debug!(keystore_id, location = %settings.location, "Loaded keystore");

        for alias in &settings.aliases {
            let key_password = settings.key_password(keystore_id, alias, self.resolver.as_ref());
            load_key(state, keystore_id, &keystore, alias, key_password.as_deref())?;
        }
        state
            .aliases
            .insert(keystore_id.to_string(), settings.aliases.clone());
        Ok(())
    }

    pub(super) fn in_txn<T, F>(&self, options: TxnOptions, work: F) -> Result<T>
    where
        F: FnMut() -> sealstore_store::Result<T>,
    {
        Ok(in_transaction(
            self.collaborators.transactions.as_ref(),
            options,
            work,
        )?)
    }

    /// Keys whose check value differs from the recorded one
    ///
    /// With `current` the comparison is against the values published by the
    /// cluster, otherwise against the durable record of keys in use.
    pub fn get_mismatched_keys(&self, current: bool) -> Result<BTreeSet<MasterKeyReference>> {
        let state = self.state.read();
        if current {
            let published = &self.collaborators.caches.check_values;
            return Ok(state
                .check_values
                .iter()
                .filter(|(r, value)| published.get(r).is_some_and(|p| &p != *value))
                .map(|(r, _)| r.clone())
                .collect());
        }

        let dao = &self.collaborators.key_dao;
        let attributes = &self.collaborators.attributes;
        let recorded = self.in_txn(TxnOptions::read_only(), || {
            let used = dao.count_symmetric_keys()?;
            let mut recorded = HashMap::new();
            for reference in used.keys() {
                let value = attributes.get_attribute(&[
                    CHECK_VALUES_ATTRIBUTE,
                    reference.keystore_id(),
                    reference.alias(),
                ])?;
                if let Some(Value::String(value)) = value {
                    recorded.insert(reference.clone(), value);
                }
            }
            Ok(recorded)
        })?;

        Ok(state
            .check_values
            .iter()
            .filter(|(r, value)| recorded.get(*r).is_some_and(|v| v != *value))
            .map(|(r, _)| r.clone())
            .collect())
    }

    /// Keys not loaded on this instance
    ///
    /// With `current` these are keys published by other cluster members,
    /// otherwise keys referenced by durable key records.
    pub fn get_missing_keys(&self, current: bool) -> Result<BTreeSet<MasterKeyReference>> {
        let candidates: Vec<MasterKeyReference> = if current {
            self.collaborators.caches.check_values.keys()
        } else {
            self.count_encrypted_symmetric_keys()?
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(r, _)| r)
                .collect()
        };

        let state = self.state.read();
        Ok(candidates
            .into_iter()
            .filter(|r| !state.check_values.contains_key(r))
            .collect())
    }

    /// Keys loaded here but not published by the cluster
    pub fn get_extraneous_keys(&self) -> BTreeSet<MasterKeyReference> {
        let state = self.state.read();
        let published = &self.collaborators.caches.check_values;
        state
            .check_values
            .keys()
            .filter(|r| !published.contains(r))
            .cloned()
            .collect()
    }

    /// Encryption keys neither disabled nor blocked
    pub fn get_active_keys(&self) -> BTreeSet<MasterKeyReference> {
        self.state.read().active_keys(&self.collaborators.caches)
    }

    /// Encryption keys disabled by an administrator
    pub fn get_disabled_keys(&self) -> BTreeSet<MasterKeyReference> {
        self.state.read().disabled_keys(&self.collaborators.caches)
    }

    /// Disabled or blocked keys that still wrap content keys
    pub fn get_keys_requiring_re_encryption(&self) -> Result<BTreeSet<MasterKeyReference>> {
        let used = self.count_encrypted_symmetric_keys()?;
        let caches = &self.collaborators.caches;
        let state = self.state.read();
        Ok(state
            .decryption_keys
            .keys()
            .filter(|r| caches.disabled.contains(r) || caches.blocked.contains(r))
            .filter(|r| used.get(*r).is_some_and(|count| *count > 0))
            .cloned()
            .collect())
    }

    /// Number of wrapped content keys per master key
    pub fn count_encrypted_symmetric_keys(&self) -> Result<HashMap<MasterKeyReference, u64>> {
        let dao = &self.collaborators.key_dao;
        self.in_txn(TxnOptions::read_only(), || dao.count_symmetric_keys())
    }

    /// Number of content keys wrapped by `master_key`
    pub fn count_encrypted_symmetric_keys_for(&self, master_key: &MasterKeyReference) -> Result<u64> {
        let dao = &self.collaborators.key_dao;
        self.in_txn(TxnOptions::read_only(), || dao.count_symmetric_keys_for(master_key))
    }

    /// Re-enable a disabled master key
    pub fn enable(&self, master_key: &MasterKeyReference) -> Result<()> {
        let state = self.state.read();
        let caches = &self.collaborators.caches;
        if !state.is_known(master_key, caches) {
            return Err(EncryptionError::InvalidArgument(format!(
                "Unknown master key {master_key}"
            )));
        }
        if !state.disabled_keys(caches).contains(master_key) {
            return Err(EncryptionError::InvalidArgument(format!(
                "Master key {master_key} is not disabled"
            )));
        }

        let attributes = &self.collaborators.attributes;
        self.in_txn(TxnOptions::read_write(), || {
            attributes.remove_attribute(&[
                DISABLED_MASTER_KEYS_ATTRIBUTE,
                master_key.keystore_id(),
                master_key.alias(),
            ])
        })?;
        caches.disabled.remove(master_key);
        info!(master_key = %master_key, "Enabled master key");
        Ok(())
    }

    /// Retire an active master key from wrapping new content keys
    pub fn disable(&self, master_key: &MasterKeyReference) -> Result<()> {
        let state = self.state.read();
        let caches = &self.collaborators.caches;
        if !state.is_known(master_key, caches) {
            return Err(EncryptionError::InvalidArgument(format!(
                "Unknown master key {master_key}"
            )));
        }
        let active = state.active_keys(caches);
        if !active.contains(master_key) {
            return Err(EncryptionError::InvalidArgument(format!(
                "Master key {master_key} is not active"
            )));
        }
        if active.len() == 1 {
            return Err(EncryptionError::IllegalState(
                "Cannot disable last remaining active encryption key".to_string(),
            ));
        }

        let attributes = &self.collaborators.attributes;
        self.in_txn(TxnOptions::read_write(), || {
            attributes.set_attribute(
                Value::Bool(true),
                &[
                    DISABLED_MASTER_KEYS_ATTRIBUTE,
                    master_key.keystore_id(),
                    master_key.alias(),
                ],
            )
        })?;
        caches.disabled.put(master_key.clone(), true);
        info!(master_key = %master_key, "Disabled master key");
        Ok(())
    }

    /// Pick one active encryption key uniformly at random
    ///
    /// Records the key's check value as last used when it differs from the
    /// durable record.
    pub fn get_random_active_encryption_key(&self) -> Result<(MasterKeyReference, MasterKey)> {
        let (reference, key, check_value) = {
            let state = self.state.read();
            let active: Vec<MasterKeyReference> = state
                .active_keys(&self.collaborators.caches)
                .into_iter()
                .collect();
            if active.is_empty() {
                return Err(EncryptionError::IllegalState(
                    "No active encryption master keys are available".to_string(),
                ));
            }

            let index = self.rng.lock().gen_range(0..active.len());
            let reference = active[index].clone();
            let key = state.encryption_keys.get(&reference).cloned();
            let check_value = state.check_values.get(&reference).cloned();
            match (key, check_value) {
                (Some(key), Some(check_value)) => (reference, key, check_value),
                _ => {
                    return Err(EncryptionError::IllegalState(format!(
                        "no key material loaded for active master key {reference}"
                    )))
                }
            }
        };
        debug!(master_key = %reference, "Selected random active encryption master key");

        let attributes = &self.collaborators.attributes;
        let keys = [CHECK_VALUES_ATTRIBUTE, reference.keystore_id(), reference.alias()];
        self.in_txn(TxnOptions::read_write(), || {
            let recorded = attributes.get_attribute(&keys)?;
            if recorded.as_ref().and_then(Value::as_str) != Some(check_value.as_str()) {
                attributes.set_attribute(Value::String(check_value.clone()), &keys)?;
            }
            Ok(())
        })?;

        Ok((reference, key))
    }

    /// Decryption material of `master_key`, if loaded
    pub fn get_decryption_key(&self, master_key: &MasterKeyReference) -> Option<MasterKey> {
        self.state.read().decryption_keys.get(master_key).cloned()
    }

    /// Whether `master_key` can unwrap content keys
    pub fn supports_decryption(&self, master_key: &MasterKeyReference) -> bool {
        self.state.read().decryption_keys.contains_key(master_key)
    }

    /// Aliases loaded per keystore id
    pub fn configured_aliases(&self) -> BTreeMap<String, Vec<String>> {
        self.state.read().aliases.clone()
    }
}

fn load_key(
    state: &mut KeyState,
    keystore_id: &str,
    keystore: &Keystore,
    alias: &str,
    password: Option<&str>,
) -> Result<()> {
    let reference = MasterKeyReference::new(keystore_id, alias);
    let config_error = |e: CryptoError| {
        EncryptionError::Configuration(format!("failed to load master key {reference}: {e}"))
    };

    let Some(entry) = keystore.entry(alias) else {
        warn!(master_key = %reference, "No key or certificate found for alias");
        return Ok(());
    };
    let algorithm: KeyAlgorithm = entry.algorithm.parse().map_err(config_error)?;
    let public = keystore.public_key(alias).map_err(config_error)?;
    let secret = if entry.key.is_some() {
        keystore
            .key(alias, password.unwrap_or_default())
            .map_err(config_error)?
    } else {
        None
    };

    let (encryption, decryption) = match (public, secret) {
        (Some(MasterKey::Public(public)), Some(MasterKey::Private(private))) => {
            if private.public_key() != public {
                return Err(EncryptionError::Configuration(format!(
                    "certificate of master key {reference} does not match its private key"
                )));
            }
            (Some(MasterKey::Public(public)), Some(MasterKey::Private(private)))
        }
        (None, Some(key @ MasterKey::Symmetric(_))) => (Some(key.clone()), Some(key)),
        (None, Some(private @ MasterKey::Private(_))) => {
            warn!(master_key = %reference, "Master key has no certificate and can only be used for decryption");
            (None, Some(private))
        }
        (Some(public), None) => {
            warn!(master_key = %reference, "Master key has no private key and can only be used for encryption");
            (Some(public), None)
        }
        (None, None) => {
            warn!(master_key = %reference, "Keystore entry holds no key material");
            return Ok(());
        }
        _ => {
            return Err(EncryptionError::Configuration(format!(
                "keystore entry of master key {reference} combines incompatible key material"
            )))
        }
    };

    let check_value = match encryption.as_ref().or(decryption.as_ref()) {
        Some(key) => key.check_value(),
        None => return Ok(()),
    };
    debug!(
        master_key = %reference,
        %algorithm,
        encrypt = encryption.is_some(),
        decrypt = decryption.is_some(),
        "Loaded master key"
    );

    if let Some(key) = encryption {
        state.encryption_keys.insert(reference.clone(), key);
    }
    if let Some(key) = decryption {
        state.decryption_keys.insert(reference.clone(), key);
    }
    state.check_values.insert(reference, check_value);
    Ok(())
}
