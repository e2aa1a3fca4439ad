//! # Sealstore Crypto
//!
//! Cryptographic primitives for Sealstore per-object content encryption.
//!
//! This crate provides:
//! - **Cipher adapter**: initialized AES (CBC/PKCS#7) and ChaCha20 ciphers for
//!   content keys, plus X25519 sealing for asymmetric master keys
//! - **Streaming channels**: byte channels that encrypt on write and decrypt on read
//! - **Key material**: content keys, master keys and their check values
//! - **Keystores**: password-protected files holding named master keys
//!
//! ## Key Model
//!
//! Every stored object gets its own random content key. Content keys are
//! persisted only in wrapped form, encrypted by one of a small set of master
//! keys loaded from keystores.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sealstore_crypto::{initialized_cipher, CipherMode, KeyAlgorithm, SymmetricKey};
//!
//! let key = SymmetricKey::generate(KeyAlgorithm::Aes, 128)?;
//! let ciphertext = initialized_cipher(&key, CipherMode::Encrypt)?.do_final(b"Hello")?;
//! let plaintext = initialized_cipher(&key, CipherMode::Decrypt)?.do_final(&ciphertext)?;
//! ```

pub mod channel;
pub mod cipher;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod keystore;
pub mod sealing;

pub use channel::{
    DecryptingReadableChannel, EncryptingWritableChannel, EncryptionListener, ReadableChannel,
    WritableChannel,
};
pub use cipher::{initialized_cipher, unwrap_key, wrap_key, Cipher, CipherKey, CipherMode};
pub use error::{CryptoError, Result};
pub use keys::{
    KeyAlgorithm, MasterKey, MasterKeyReference, PrivateKey, PublicKey, SymmetricKey,
    DEFAULT_KEY_ALGORITHM, DEFAULT_KEY_SIZE,
};
pub use keystore::{KdfParams, Keystore, KeystoreBuilder, KeystoreEntry};
