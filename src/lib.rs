//! # Sealstore
//!
//! Transparent per-object encryption for pluggable content stores.
//!
//! Re-exports the workspace crates:
//! - [`crypto`]: content ciphers, streaming channels, keystores
//! - [`store`]: content store abstractions and in-memory collaborators
//! - [`core`]: master key management, the content key manager and the encrypting facade

pub use sealstore_core as core;
pub use sealstore_crypto as crypto;
pub use sealstore_store as store;

pub use sealstore_core::{
    Collaborators, EncryptingContentStore, EncryptingContentStoreManager, EncryptionError,
    EncryptionSettings, KeystoreSettings, MasterKeyManager,
};
