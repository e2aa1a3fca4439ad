//! Durable records linking content URLs to wrapped content keys

use crate::{Result, StoreError};
use parking_lot::RwLock;
use sealstore_crypto::{KeyAlgorithm, MasterKeyReference};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

mod base64_vec_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

/// A content key wrapped by a master key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKey {
    /// Master key that wrapped the content key
    pub master_key: MasterKeyReference,
    /// Algorithm of the wrapped content key
    pub algorithm: KeyAlgorithm,
    /// Wrapped key bytes
    #[serde(with = "base64_vec_serde")]
    pub bytes: Vec<u8>,
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("master_key", &self.master_key.to_string())
            .field("algorithm", &self.algorithm)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Metadata record of a stored content URL
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentUrlEntity {
    /// Record id
    pub id: u64,
    /// The content URL
    pub content_url: String,
    /// Recorded content size
    pub size: u64,
    /// Wrapped content key, if the content is encrypted
    pub key: Option<ContentUrlKeyEntity>,
}

/// Wrapped content key linked to a content URL record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentUrlKeyEntity {
    /// Record id; ascending in creation order
    pub id: u64,
    /// Id of the owning [`ContentUrlEntity`]
    pub content_url_id: u64,
    /// The wrapped key
    pub encrypted_key: EncryptedKey,
    /// Size of the content before encryption
    pub unencrypted_size: u64,
}

impl fmt::Display for ContentUrlKeyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ContentUrlKeyEntity[id={}, contentUrlId={}, masterKey={}]",
            self.id, self.content_url_id, self.encrypted_key.master_key
        )
    }
}

/// Storage of content URL records and their wrapped keys.
///
/// Callers run these operations inside a [`crate::TransactionBoundary`].
pub trait ContentUrlKeyDao: Send + Sync {
    /// Look up the record of a content URL
    fn get_content_url(&self, content_url: &str) -> Result<Option<ContentUrlEntity>>;

    /// Look up or create the record of a content URL
    fn get_or_create_content_url(&self, content_url: &str, size: u64) -> Result<ContentUrlEntity>;

    /// Link a new wrapped key to a content URL, replacing any existing one.
    ///
    /// A missing content URL record is created with `unencrypted_size` as its size.
    fn update_content_url_key(
        &self,
        content_url: &str,
        encrypted_key: EncryptedKey,
        unencrypted_size: u64,
    ) -> Result<bool>;

    /// Replace the wrapped key of an existing key record, keeping its id.
    ///
    /// Returns `false` if the record or its content URL no longer exists.
    fn update_key_entity(&self, entity: &ContentUrlKeyEntity) -> Result<bool>;

    /// Remove a content URL record together with its key
    fn delete_content_url(&self, content_url: &str) -> Result<bool>;

    /// Number of wrapped keys per master key
    fn count_symmetric_keys(&self) -> Result<HashMap<MasterKeyReference, u64>>;

    /// Number of wrapped keys under one master key
    fn count_symmetric_keys_for(&self, master_key: &MasterKeyReference) -> Result<u64>;

    /// Page of key records wrapped by `master_key`, in ascending id order,
    /// starting strictly after `from_id`
    fn get_symmetric_keys(
        &self,
        master_key: &MasterKeyReference,
        from_id: Option<u64>,
        max_results: usize,
    ) -> Result<Vec<ContentUrlKeyEntity>>;
}

#[derive(Default)]
struct DaoState {
    urls: BTreeMap<u64, ContentUrlEntity>,
    ids_by_url: HashMap<String, u64>,
    url_ids_by_key: BTreeMap<u64, u64>,
    next_url_id: u64,
    next_key_id: u64,
}

impl DaoState {
    fn create_url(&mut self, content_url: &str, size: u64) -> &mut ContentUrlEntity {
        self.next_url_id += 1;
        let id = self.next_url_id;
        self.ids_by_url.insert(content_url.to_string(), id);
        self.urls.entry(id).or_insert(ContentUrlEntity {
            id,
            content_url: content_url.to_string(),
            size,
            key: None,
        })
    }
}

/// In-memory content URL key storage
#[derive(Default)]
pub struct MemoryContentUrlKeyDao {
    state: RwLock<DaoState>,
}

impl MemoryContentUrlKeyDao {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of content URL records
    pub fn len(&self) -> usize {
        self.state.read().urls.len()
    }

    /// Check if there are no records
    pub fn is_empty(&self) -> bool {
        self.state.read().urls.is_empty()
    }

    /// All key records, in ascending id order
    pub fn key_entities(&self) -> Vec<ContentUrlKeyEntity> {
        let state = self.state.read();
        state
            .url_ids_by_key
            .values()
            .filter_map(|url_id| state.urls.get(url_id).and_then(|e| e.key.clone()))
            .collect()
    }
}

impl ContentUrlKeyDao for MemoryContentUrlKeyDao {
    fn get_content_url(&self, content_url: &str) -> Result<Option<ContentUrlEntity>> {
        let state = self.state.read();
        Ok(state
            .ids_by_url
            .get(content_url)
            .and_then(|id| state.urls.get(id))
            .cloned())
    }

    fn get_or_create_content_url(&self, content_url: &str, size: u64) -> Result<ContentUrlEntity> {
        let mut state = self.state.write();
        if let Some(id) = state.ids_by_url.get(content_url).copied() {
            if let Some(entity) = state.urls.get(&id) {
                return Ok(entity.clone());
            }
        }
        Ok(state.create_url(content_url, size).clone())
    }

    fn update_content_url_key(
        &self,
        content_url: &str,
        encrypted_key: EncryptedKey,
        unencrypted_size: u64,
    ) -> Result<bool> {
        let mut state = self.state.write();
        state.next_key_id += 1;
        let key_id = state.next_key_id;

        let url_id = match state.ids_by_url.get(content_url).copied() {
            Some(id) => id,
            None => state.create_url(content_url, unencrypted_size).id,
        };
        let entity = state
            .urls
            .get_mut(&url_id)
            .ok_or_else(|| StoreError::Conflict(format!("record for {} vanished", content_url)))?;

        let previous = entity.key.replace(ContentUrlKeyEntity {
            id: key_id,
            content_url_id: url_id,
            encrypted_key,
            unencrypted_size,
        });
        if let Some(previous) = previous {
            state.url_ids_by_key.remove(&previous.id);
        }
        state.url_ids_by_key.insert(key_id, url_id);
        Ok(true)
    }

    fn update_key_entity(&self, entity: &ContentUrlKeyEntity) -> Result<bool> {
        let mut state = self.state.write();
        let Some(url) = state.urls.get_mut(&entity.content_url_id) else {
            return Ok(false);
        };
        match url.key.as_mut() {
            Some(key) if key.id == entity.id => {
                key.encrypted_key = entity.encrypted_key.clone();
                key.unencrypted_size = entity.unencrypted_size;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_content_url(&self, content_url: &str) -> Result<bool> {
        let mut state = self.state.write();
        let Some(id) = state.ids_by_url.remove(content_url) else {
            return Ok(false);
        };
        if let Some(entity) = state.urls.remove(&id) {
            if let Some(key) = entity.key {
                state.url_ids_by_key.remove(&key.id);
            }
        }
        Ok(true)
    }

    fn count_symmetric_keys(&self) -> Result<HashMap<MasterKeyReference, u64>> {
        let state = self.state.read();
        let mut counts = HashMap::new();
        for key in state.urls.values().filter_map(|e| e.key.as_ref()) {
            *counts.entry(key.encrypted_key.master_key.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn count_symmetric_keys_for(&self, master_key: &MasterKeyReference) -> Result<u64> {
        let state = self.state.read();
        Ok(state
            .urls
            .values()
            .filter_map(|e| e.key.as_ref())
            .filter(|key| &key.encrypted_key.master_key == master_key)
            .count() as u64)
    }

    fn get_symmetric_keys(
        &self,
        master_key: &MasterKeyReference,
        from_id: Option<u64>,
        max_results: usize,
    ) -> Result<Vec<ContentUrlKeyEntity>> {
        let state = self.state.read();
        let lower = from_id.map_or(0, |id| id.saturating_add(1));
        Ok(state
            .url_ids_by_key
            .range(lower..)
            .filter_map(|(_, url_id)| state.urls.get(url_id).and_then(|e| e.key.as_ref()))
            .filter(|key| &key.encrypted_key.master_key == master_key)
            .take(max_results)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapped(master_key: &MasterKeyReference) -> EncryptedKey {
        EncryptedKey {
            master_key: master_key.clone(),
            algorithm: KeyAlgorithm::Aes,
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_update_creates_missing_record() {
        let dao = MemoryContentUrlKeyDao::new();
        let mk = MasterKeyReference::new("ks", "a");

        assert!(dao.get_content_url("store://x").unwrap().is_none());
        assert!(dao.update_content_url_key("store://x", wrapped(&mk), 42).unwrap());

        let entity = dao.get_content_url("store://x").unwrap().unwrap();
        assert_eq!(entity.size, 42);
        let key = entity.key.unwrap();
        assert_eq!(key.unencrypted_size, 42);
        assert_eq!(key.content_url_id, entity.id);
    }

    #[test]
    fn test_update_keeps_existing_record() {
        let dao = MemoryContentUrlKeyDao::new();
        let mk = MasterKeyReference::new("ks", "a");
        let created = dao.get_or_create_content_url("store://x", 64).unwrap();

        dao.update_content_url_key("store://x", wrapped(&mk), 42).unwrap();
        let entity = dao.get_content_url("store://x").unwrap().unwrap();
        assert_eq!(entity.id, created.id);
        assert_eq!(entity.size, 64);
        assert_eq!(dao.len(), 1);
    }

    #[test]
    fn test_counts() {
        let dao = MemoryContentUrlKeyDao::new();
        let a = MasterKeyReference::new("ks", "a");
        let b = MasterKeyReference::new("ks", "b");
        for i in 0..5 {
            let mk = if i % 2 == 0 { &a } else { &b };
            dao.update_content_url_key(&format!("store://{}", i), wrapped(mk), 1).unwrap();
        }

        let counts = dao.count_symmetric_keys().unwrap();
        assert_eq!(counts.get(&a), Some(&3));
        assert_eq!(counts.get(&b), Some(&2));
        assert_eq!(dao.count_symmetric_keys_for(&a).unwrap(), 3);
        assert_eq!(dao.count_symmetric_keys_for(&MasterKeyReference::new("ks", "c")).unwrap(), 0);
    }

    #[test]
    fn test_keyset_pagination() {
        let dao = MemoryContentUrlKeyDao::new();
        let mk = MasterKeyReference::new("ks", "a");
        let other = MasterKeyReference::new("ks", "b");
        for i in 0..10 {
            dao.update_content_url_key(&format!("store://a{}", i), wrapped(&mk), 1).unwrap();
            dao.update_content_url_key(&format!("store://b{}", i), wrapped(&other), 1).unwrap();
        }

        let mut seen = Vec::new();
        let mut from_id = None;
        loop {
            let page = dao.get_symmetric_keys(&mk, from_id, 3).unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 3);
            from_id = page.last().map(|e| e.id);
            seen.extend(page.into_iter().map(|e| e.id));
        }

        assert_eq!(seen.len(), 10);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_pagination_stable_under_delete() {
        let dao = MemoryContentUrlKeyDao::new();
        let mk = MasterKeyReference::new("ks", "a");
        for i in 0..6 {
            dao.update_content_url_key(&format!("store://{}", i), wrapped(&mk), 1).unwrap();
        }

        let first = dao.get_symmetric_keys(&mk, None, 3).unwrap();
        dao.delete_content_url("store://0").unwrap();
        dao.delete_content_url("store://4").unwrap();
        let second = dao.get_symmetric_keys(&mk, first.last().map(|e| e.id), 3).unwrap();

        let ids: Vec<_> = second.iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| *id > first[2].id));
    }

    #[test]
    fn test_update_key_entity_after_delete() {
        let dao = MemoryContentUrlKeyDao::new();
        let mk = MasterKeyReference::new("ks", "a");
        dao.update_content_url_key("store://x", wrapped(&mk), 1).unwrap();
        let mut entity = dao.get_content_url("store://x").unwrap().unwrap().key.unwrap();

        entity.encrypted_key.bytes = vec![9, 9];
        assert!(dao.update_key_entity(&entity).unwrap());
        assert_eq!(dao.key_entities()[0].encrypted_key.bytes, vec![9, 9]);

        dao.delete_content_url("store://x").unwrap();
        assert!(!dao.update_key_entity(&entity).unwrap());
    }
}
