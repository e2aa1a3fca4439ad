//! Error types for the sealstore-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Algorithm name not supported by the cipher adapter
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Key cannot be used in the requested cipher mode
    #[error("key not usable for {mode}: {reason}")]
    UnusableKey { mode: &'static str, reason: String },

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Padding of the final block is malformed
    #[error("bad padding in final block")]
    BadPadding,

    /// Final input of a block cipher is not a multiple of the block size
    #[error("illegal block size: {len} bytes is not a multiple of {block_size}")]
    IllegalBlockSize { len: usize, block_size: usize },

    /// Output buffer too small for the requested transform
    #[error("short buffer: {required} bytes required, {available} available")]
    ShortBuffer { required: usize, available: usize },

    /// Cipher was used after finalization
    #[error("cipher already finalized")]
    Finalized,

    /// Keystore could not be parsed, verified or unsealed
    #[error("keystore error: {0}")]
    Keystore(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Hex decode error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

impl CryptoError {
    /// Wrap into an `std::io::Error` for use inside byte channels
    pub fn into_io(self) -> std::io::Error {
        match self {
            CryptoError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
