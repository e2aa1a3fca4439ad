//! Caches shared between cooperating instances

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

/// An eventually consistent associative cache visible to all cluster members.
///
/// No locking or transactional guarantees are implied across instances.
pub trait SharedCache<K, V>: Send + Sync {
    /// Read an entry
    fn get(&self, key: &K) -> Option<V>;

    /// Write an entry
    fn put(&self, key: K, value: V);

    /// Remove an entry
    fn remove(&self, key: &K);

    /// All keys currently cached
    fn keys(&self) -> Vec<K>;

    /// Whether an entry exists
    fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Whether the cache holds no entries
    fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

/// In-memory cache; clones share their entries, so several managers holding
/// clones of one cache behave like a cluster
pub struct MemoryCache<K, V> {
    entries: Arc<DashMap<K, V>>,
}

impl<K: Eq + Hash, V> MemoryCache<K, V> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Eq + Hash, V> Default for MemoryCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for MemoryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> SharedCache<K, V> for MemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}
