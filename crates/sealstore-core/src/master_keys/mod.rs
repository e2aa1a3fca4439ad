//! Master key store
//!
//! Loads master keys from the configured keystores, tracks which of them may
//! wrap new content keys and validates the loaded set against durable key
//! records and the other members of the cluster:
//! - **Active**: usable for wrapping new content keys
//! - **Disabled**: administratively retired, still decrypts
//! - **Blocked**: excluded because cluster members disagree about it

mod manager;
mod validation;

pub use manager::MasterKeyManager;

/// Attribute root of administratively disabled master keys
pub const DISABLED_MASTER_KEYS_ATTRIBUTE: &str = "sealstore/disabledEncryptionMasterKeys";

/// Attribute root of the last check value used per master key
pub const CHECK_VALUES_ATTRIBUTE: &str = "sealstore/encryptionMasterKeyCheckValues";
