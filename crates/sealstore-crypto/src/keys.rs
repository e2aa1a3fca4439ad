//! Key material for the Sealstore encryption layer
//!
//! Two kinds of keys exist:
//! - **Symmetric keys**: random per-object content keys (and symmetric master keys)
//! - **Master keys**: long-lived keys identified by a [`MasterKeyReference`], only
//!   ever used to wrap and unwrap symmetric content keys

use crate::{hashing, CryptoError, Result};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an X25519 key in bytes
pub const X25519_KEY_SIZE: usize = 32;

/// Default content key algorithm
pub const DEFAULT_KEY_ALGORITHM: KeyAlgorithm = KeyAlgorithm::Aes;

/// Default content key size in bits
pub const DEFAULT_KEY_SIZE: u32 = 128;

/// Algorithms understood by the cipher adapter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// AES block cipher (CBC, PKCS#7 padding)
    #[serde(rename = "AES")]
    Aes,
    /// ChaCha20 stream cipher
    #[serde(rename = "ChaCha20")]
    ChaCha20,
    /// X25519 sealing (master keys only)
    #[serde(rename = "X25519")]
    X25519,
}

impl KeyAlgorithm {
    /// Get the canonical algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes => "AES",
            Self::ChaCha20 => "ChaCha20",
            Self::X25519 => "X25519",
        }
    }

    /// Whether keys of this algorithm are plain secret bytes
    pub fn is_symmetric(&self) -> bool {
        !matches!(self, Self::X25519)
    }

    /// Supported key sizes in bits
    pub fn key_sizes(&self) -> &'static [u32] {
        match self {
            Self::Aes => &[128, 192, 256],
            Self::ChaCha20 | Self::X25519 => &[256],
        }
    }

    /// Default key size in bits
    pub fn default_key_size(&self) -> u32 {
        match self {
            Self::Aes => DEFAULT_KEY_SIZE,
            Self::ChaCha20 | Self::X25519 => 256,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AES" => Ok(Self::Aes),
            "CHACHA20" => Ok(Self::ChaCha20),
            "X25519" => Ok(Self::X25519),
            _ => Err(CryptoError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// A symmetric key (per-object content key or symmetric master key)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    #[zeroize(skip)]
    algorithm: KeyAlgorithm,
    bytes: Vec<u8>,
}

impl SymmetricKey {
    /// Generate a fresh random key; a `key_size` of 0 selects the algorithm default
    pub fn generate(algorithm: KeyAlgorithm, key_size: u32) -> Result<Self> {
        if !algorithm.is_symmetric() {
            return Err(CryptoError::KeyGeneration(format!(
                "{} is not a symmetric algorithm",
                algorithm
            )));
        }
        let key_size = if key_size == 0 {
            algorithm.default_key_size()
        } else {
            key_size
        };
        if !algorithm.key_sizes().contains(&key_size) {
            return Err(CryptoError::KeyGeneration(format!(
                "unsupported key size {} for {} (supported: {:?})",
                key_size,
                algorithm,
                algorithm.key_sizes()
            )));
        }

        let mut bytes = vec![0u8; (key_size / 8) as usize];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
        Ok(Self { algorithm, bytes })
    }

    /// Create a key from raw bytes
    pub fn from_bytes(algorithm: KeyAlgorithm, bytes: &[u8]) -> Result<Self> {
        if !algorithm.is_symmetric() {
            return Err(CryptoError::InvalidKey(format!(
                "{} is not a symmetric algorithm",
                algorithm
            )));
        }
        let bits = (bytes.len() * 8) as u32;
        if !algorithm.key_sizes().contains(&bits) {
            return Err(CryptoError::InvalidKey(format!(
                "{} key must be one of {:?} bits, got {}",
                algorithm,
                algorithm.key_sizes(),
                bits
            )));
        }
        Ok(Self {
            algorithm,
            bytes: bytes.to_vec(),
        })
    }

    /// Get the key algorithm
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the key size in bits
    pub fn key_size(&self) -> u32 {
        (self.bytes.len() * 8) as u32
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey({}/{})", self.algorithm, self.key_size())
    }
}

/// An X25519 public key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; X25519_KEY_SIZE],
}

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != X25519_KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "public key must be {} bytes, got {}",
                X25519_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; X25519_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.bytes
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.bytes)
    }

    /// Decode from base64
    pub fn from_base64(s: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

/// An X25519 private key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    bytes: [u8; X25519_KEY_SIZE],
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        let mut bytes = [0u8; X25519_KEY_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
        Self { bytes }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != X25519_KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "private key must be {} bytes, got {}",
                X25519_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; X25519_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.bytes
    }

    /// Derive the public key from this private key
    pub fn public_key(&self) -> PublicKey {
        use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
        let secret = StaticSecret::from(self.bytes);
        let public = X25519Public::from(&secret);
        PublicKey {
            bytes: *public.as_bytes(),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Identity of a master key: the keystore it was loaded from plus its alias
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MasterKeyReference {
    keystore_id: String,
    alias: String,
}

impl MasterKeyReference {
    /// Create a new reference
    pub fn new(keystore_id: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            keystore_id: keystore_id.into(),
            alias: alias.into(),
        }
    }

    /// ID of the keystore the key was loaded from
    pub fn keystore_id(&self) -> &str {
        &self.keystore_id
    }

    /// Alias of the key within its keystore
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl fmt::Display for MasterKeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.keystore_id, self.alias)
    }
}

impl FromStr for MasterKeyReference {
    type Err = CryptoError;

    /// Parse `<keystoreId>:<alias>`; the alias may itself contain colons
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((keystore_id, alias)) if !keystore_id.is_empty() && !alias.is_empty() => {
                Ok(Self::new(keystore_id, alias))
            }
            _ => Err(CryptoError::InvalidKey(format!(
                "master key must be specified as <keystoreId>:<alias>, got {:?}",
                s
            ))),
        }
    }
}

/// Master key material loaded from a keystore
#[derive(Clone)]
pub enum MasterKey {
    /// Symmetric master key, usable for both wrapping and unwrapping
    Symmetric(SymmetricKey),
    /// Public half of an asymmetric key, usable for wrapping only
    Public(PublicKey),
    /// Private half of an asymmetric key, usable for unwrapping only
    Private(PrivateKey),
}

impl MasterKey {
    /// Get the key algorithm
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::Symmetric(key) => key.algorithm(),
            Self::Public(_) | Self::Private(_) => KeyAlgorithm::X25519,
        }
    }

    /// Compute the check value identifying this key material.
    ///
    /// Public, private and key-pair entries of the same asymmetric key share one
    /// check value because the public half is hashed in every case.
    pub fn check_value(&self) -> String {
        match self {
            Self::Symmetric(key) => hashing::check_value(key.algorithm(), key.as_bytes()),
            Self::Public(public) => hashing::check_value(KeyAlgorithm::X25519, public.as_bytes()),
            Self::Private(private) => {
                hashing::check_value(KeyAlgorithm::X25519, private.public_key().as_bytes())
            }
        }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric(key) => write!(f, "MasterKey::Symmetric({:?})", key),
            Self::Public(key) => write!(f, "MasterKey::Public({:?})", key),
            Self::Private(_) => f.write_str("MasterKey::Private(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_key_generation() {
        let key1 = SymmetricKey::generate(KeyAlgorithm::Aes, 128).unwrap();
        let key2 = SymmetricKey::generate(KeyAlgorithm::Aes, 128).unwrap();
        assert_eq!(key1.as_bytes().len(), 16);
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_default_key_size() {
        let aes = SymmetricKey::generate(KeyAlgorithm::Aes, 0).unwrap();
        assert_eq!(aes.key_size(), DEFAULT_KEY_SIZE);

        let chacha = SymmetricKey::generate(KeyAlgorithm::ChaCha20, 0).unwrap();
        assert_eq!(chacha.key_size(), 256);
    }

    #[test]
    fn test_unsupported_key_size() {
        assert!(SymmetricKey::generate(KeyAlgorithm::Aes, 100).is_err());
        assert!(SymmetricKey::generate(KeyAlgorithm::ChaCha20, 128).is_err());
        assert!(SymmetricKey::generate(KeyAlgorithm::X25519, 256).is_err());
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("aes".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Aes);
        assert_eq!("ChaCha20".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::ChaCha20);
        assert_eq!(KeyAlgorithm::X25519.to_string(), "X25519");
        assert!("Blowfish".parse::<KeyAlgorithm>().is_err());
    }

    #[test]
    fn test_master_key_reference_parsing() {
        let reference: MasterKeyReference = "primary:key:2024".parse().unwrap();
        assert_eq!(reference.keystore_id(), "primary");
        assert_eq!(reference.alias(), "key:2024");
        assert_eq!(reference.to_string(), "primary:key:2024");

        assert!("no-separator".parse::<MasterKeyReference>().is_err());
        assert!(":alias".parse::<MasterKeyReference>().is_err());
        assert!("store:".parse::<MasterKeyReference>().is_err());
    }

    #[test]
    fn test_asymmetric_check_values_agree() {
        let private = PrivateKey::generate();
        let public = private.public_key();

        let from_private = MasterKey::Private(private).check_value();
        let from_public = MasterKey::Public(public).check_value();
        assert_eq!(from_private, from_public);
        assert!(from_public.starts_with("X25519#"));
    }

    #[test]
    fn test_check_value_distinguishes_keys() {
        let a = MasterKey::Symmetric(SymmetricKey::generate(KeyAlgorithm::Aes, 256).unwrap());
        let b = MasterKey::Symmetric(SymmetricKey::generate(KeyAlgorithm::Aes, 256).unwrap());
        assert_ne!(a.check_value(), b.check_value());
        assert_eq!(a.check_value(), a.clone().check_value());
    }

    #[test]
    fn test_public_key_base64_roundtrip() {
        let public = PrivateKey::generate().public_key();
        let decoded = PublicKey::from_base64(&public.to_base64()).unwrap();
        assert_eq!(public, decoded);
    }
}
