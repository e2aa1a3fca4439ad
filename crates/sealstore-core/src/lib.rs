//! # Sealstore Core
//!
//! Per-object encryption layer for content stores.
//!
//! This crate provides:
//! - **Master Key Management**: keystore loading, enable/disable, random active key choice
//! - **Startup Validation**: consistency checks against key records and cluster members
//! - **Content Key Management**: per-object keys wrapped by master keys
//! - **Encrypting Store Facade**: transparent encryption of a backing content store
//! - **Re-encryption**: batch re-wrapping of content keys of retired master keys
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         EncryptingContentStore          │
//! ├─────────────────────────────────────────┤
//! │      EncryptingContentStoreManager      │
//! ├────────────────────┬────────────────────┤
//! │  MasterKeyManager  │   BatchProcessor   │
//! ├────────────────────┴────────────────────┤
//! │    Key records · Attributes · Caches    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use sealstore_core::{
//!     Collaborators, EncryptingContentStore, EncryptingContentStoreManager, EncryptionSettings,
//!     FileSystemResolver, MasterKeyManager,
//! };
//! use sealstore_store::{ContentContext, ContentStore, ContentWriter, MemoryContentStore};
//! use std::sync::Arc;
//!
//! let settings = Arc::new(EncryptionSettings::load(Some("sealstore.toml".as_ref()))?);
//! let collaborators = Collaborators::in_memory();
//! let master_keys = Arc::new(MasterKeyManager::new(
//!     settings,
//!     Arc::new(FileSystemResolver::new()),
//!     collaborators.clone(),
//! ));
//! let manager = Arc::new(EncryptingContentStoreManager::new(master_keys.clone(), &collaborators));
//! let store = EncryptingContentStore::new(Arc::new(MemoryContentStore::new()), manager)?;
//! master_keys.on_startup()?;
//!
//! let writer = store.writer(&ContentContext::new())?;
//! writer.put_content(b"Hello, World!")?;
//! ```

pub mod admin;
pub mod batch;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod facade;
pub mod manager;
pub mod master_keys;
pub mod reader;
pub mod resource;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use admin::{AdminCommand, AdminResponse};
pub use batch::{BatchProcessor, BatchReport, BatchWorkProvider, BatchWorker};
pub use collaborators::{ClusterCaches, Collaborators};
pub use config::{EncryptionSettings, KeystoreSettings, PasswordSettings};
pub use error::{EncryptionError, Result};
pub use facade::EncryptingContentStore;
pub use manager::EncryptingContentStoreManager;
pub use master_keys::MasterKeyManager;
pub use reader::DecryptingContentReader;
pub use resource::{FileSystemResolver, MemoryResolver, ResourceResolver};
pub use writer::{EncryptingContentWriter, WriteCounters};
