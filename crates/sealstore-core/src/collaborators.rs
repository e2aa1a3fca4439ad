//! Host collaborators shared by the encryption layer components

use sealstore_crypto::MasterKeyReference;
use sealstore_store::{
    AttributeStore, ContentUrlKeyDao, MemoryAttributeStore, MemoryCache, MemoryContentUrlKeyDao,
    RetryingTransactionHelper, SharedCache, TransactionBoundary,
};
use std::sync::Arc;

/// Cluster-visible caches of master key state
#[derive(Clone)]
pub struct ClusterCaches {
    /// Check value published per master key
    pub check_values: Arc<dyn SharedCache<MasterKeyReference, String>>,
    /// Administratively disabled master keys
    pub disabled: Arc<dyn SharedCache<MasterKeyReference, bool>>,
    /// Master keys excluded because of cluster inconsistencies
    pub blocked: Arc<dyn SharedCache<MasterKeyReference, bool>>,
}

impl ClusterCaches {
    /// Fresh in-memory caches
    pub fn in_memory() -> Self {
        Self {
            check_values: Arc::new(MemoryCache::new()),
            disabled: Arc::new(MemoryCache::new()),
            blocked: Arc::new(MemoryCache::new()),
        }
    }
}

/// Durable storage, cluster caches and transaction boundary used by the
/// master key and content store managers
///
/// Cloning shares every collaborator, so clones handed to several managers
/// behave like cluster members on one database.
#[derive(Clone)]
pub struct Collaborators {
    /// Wrapped content key records
    pub key_dao: Arc<dyn ContentUrlKeyDao>,
    /// Durable attributes
    pub attributes: Arc<dyn AttributeStore>,
    /// Transaction boundary for all durable storage access
    pub transactions: Arc<dyn TransactionBoundary>,
    /// Cluster caches
    pub caches: ClusterCaches,
}

impl Collaborators {
    /// In-memory collaborators with the default retrying transaction helper
    pub fn in_memory() -> Self {
        Self {
            key_dao: Arc::new(MemoryContentUrlKeyDao::new()),
            attributes: Arc::new(MemoryAttributeStore::new()),
            transactions: Arc::new(RetryingTransactionHelper::new()),
            caches: ClusterCaches::in_memory(),
        }
    }

    /// Same durable storage, but separate cluster caches
    ///
    /// Models an instance that shares the database but not the cluster.
    pub fn with_separate_caches(&self) -> Self {
        Self {
            caches: ClusterCaches::in_memory(),
            ..self.clone()
        }
    }
}
