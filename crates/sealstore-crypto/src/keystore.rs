//! Password-protected keystore files
//!
//! A keystore is a JSON document mapping aliases to master key entries:
//!
//! ```json
//! {
//!   "format": "sealstore-keystore-v1",
//!   "entries": {
//!     "primary": {
//!       "algorithm": "AES",
//!       "key": {
//!         "kdf": { "algorithm": "argon2id", "memory_kib": 19456, "iterations": 2, "parallelism": 1 },
//!         "salt": "..", "nonce": "..", "ciphertext": ".."
//!       }
//!     },
//!     "archive": { "algorithm": "X25519", "public": "..", "key": { .. } }
//!   },
//!   "mac": "<hex>"
//! }
//! ```
//!
//! Secret material is sealed with AES-256-GCM under a key stretched from the
//! entry password with Argon2id, using the salt and cost parameters stored in
//! the entry, then expanded with HKDF-SHA256. The optional `mac` authenticates all entries with
//! the store password; when present, loading without the right store password
//! fails.

use crate::hashing;
use crate::keys::{KeyAlgorithm, MasterKey, PrivateKey, PublicKey, SymmetricKey};
use crate::{CryptoError, Result};
use aes_gcm::{aead::Aead as AeadTrait, Aes256Gcm, KeyInit, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use zeroize::Zeroizing;

/// Format marker written into every keystore
pub const KEYSTORE_FORMAT: &str = "sealstore-keystore-v1";

/// HKDF info for entry sealing keys
const ENTRY_KEY_INFO: &[u8] = b"sealstore keystore entry v1";

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const ENTRY_KEY_SIZE: usize = 32;

/// Name of the only supported password hash
const ARGON2ID: &str = "argon2id";

/// Argon2id cost parameters of an entry password
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    algorithm: KdfAlgorithm,
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
struct KdfAlgorithm;

impl TryFrom<String> for KdfAlgorithm {
    type Error = String;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        if name.eq_ignore_ascii_case(ARGON2ID) {
            Ok(KdfAlgorithm)
        } else {
            Err(format!("unsupported keystore KDF {name:?}"))
        }
    }
}

impl From<KdfAlgorithm> for String {
    fn from(_: KdfAlgorithm) -> Self {
        ARGON2ID.to_string()
    }
}

impl KdfParams {
    /// Argon2id with explicit costs
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            algorithm: KdfAlgorithm,
            memory_kib,
            iterations,
            parallelism,
        }
    }

    fn hasher(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(ENTRY_KEY_SIZE),
        )
        .map_err(|e| CryptoError::Keystore(format!("invalid KDF parameters {self:?}: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    /// 19 MiB, 2 passes, 1 lane
    fn default() -> Self {
        Self::new(19 * 1024, 2, 1)
    }
}

fn b64() -> &'static base64::engine::GeneralPurpose {
    &base64::engine::general_purpose::STANDARD
}

/// Secret key material sealed under an entry password
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedSecret {
    kdf: KdfParams,
    salt: String,
    nonce: String,
    ciphertext: String,
}

impl SealedSecret {
    fn seal(password: &str, secret: &[u8], kdf: KdfParams) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher = entry_cipher(password, &salt, &kdf)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), secret)
            .map_err(|e| CryptoError::Keystore(format!("failed to seal entry: {}", e)))?;

        Ok(Self {
            kdf,
            salt: b64().encode(salt),
            nonce: b64().encode(nonce),
            ciphertext: b64().encode(ciphertext),
        })
    }

    fn open(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let salt = b64().decode(&self.salt)?;
        let nonce = b64().decode(&self.nonce)?;
        let ciphertext = b64().decode(&self.ciphertext)?;
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Keystore(format!(
                "entry nonce must be {} bytes, got {}",
                NONCE_SIZE,
                nonce.len()
            )));
        }

        let cipher = entry_cipher(password, &salt, &self.kdf)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Keystore("wrong password for keystore entry".to_string()))
    }

    /// Cost parameters the entry was sealed with
    pub fn kdf_params(&self) -> KdfParams {
        self.kdf
    }
}

fn entry_cipher(password: &str, salt: &[u8], kdf: &KdfParams) -> Result<Aes256Gcm> {
    let mut stretched = Zeroizing::new([0u8; ENTRY_KEY_SIZE]);
    kdf.hasher()?
        .hash_password_into(password.as_bytes(), salt, stretched.as_mut_slice())
        .map_err(|e| CryptoError::Keystore(format!("password hashing failed: {e}")))?;

    let hk = Hkdf::<Sha256>::from_prk(stretched.as_slice())
        .map_err(|e| CryptoError::Keystore(format!("key derivation failed: {e}")))?;
    let mut okm = Zeroizing::new([0u8; ENTRY_KEY_SIZE]);
    hk.expand(ENTRY_KEY_INFO, okm.as_mut_slice())
        .map_err(|e| CryptoError::Keystore(format!("key derivation failed: {}", e)))?;
    Aes256Gcm::new_from_slice(okm.as_slice()).map_err(|e| CryptoError::Keystore(e.to_string()))
}

/// One alias in a keystore
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeystoreEntry {
    /// Algorithm name of the stored key
    pub algorithm: String,
    /// Base64 public key ("certificate") of an asymmetric key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<String>,
    /// Sealed secret or private key material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<SealedSecret>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreDocument {
    format: String,
    entries: BTreeMap<String, KeystoreEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mac: Option<String>,
}

/// A loaded keystore
#[derive(Clone, Debug, Default)]
pub struct Keystore {
    entries: BTreeMap<String, KeystoreEntry>,
}

impl Keystore {
    /// Load a keystore, verifying its integrity MAC when one is present
    pub fn load<R: Read>(reader: R, store_password: Option<&str>) -> Result<Self> {
        let document: KeystoreDocument = serde_json::from_reader(reader)?;
        if document.format != KEYSTORE_FORMAT {
            return Err(CryptoError::Keystore(format!(
                "unsupported keystore format {:?}",
                document.format
            )));
        }

        if let Some(mac) = &document.mac {
            let password = store_password.ok_or_else(|| {
                CryptoError::Keystore("keystore is protected but no password was given".to_string())
            })?;
            let content = serde_json::to_vec(&document.entries)?;
            if !hashing::verify_keystore_mac(password, &content, mac) {
                return Err(CryptoError::Keystore(
                    "keystore integrity check failed: wrong password or tampered file".to_string(),
                ));
            }
        }

        Ok(Self {
            entries: document.entries,
        })
    }

    /// Load a keystore from a byte slice
    pub fn from_slice(bytes: &[u8], store_password: Option<&str>) -> Result<Self> {
        Self::load(bytes, store_password)
    }

    /// All aliases, in sorted order
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether `alias` exists
    pub fn contains_alias(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    /// Raw entry for `alias`
    pub fn entry(&self, alias: &str) -> Option<&KeystoreEntry> {
        self.entries.get(alias)
    }

    /// Algorithm of the key stored under `alias`
    pub fn algorithm(&self, alias: &str) -> Result<Option<KeyAlgorithm>> {
        self.entries
            .get(alias)
            .map(|entry| entry.algorithm.parse())
            .transpose()
    }

    /// Public key ("certificate") stored under `alias`, usable for wrapping only
    pub fn public_key(&self, alias: &str) -> Result<Option<MasterKey>> {
        let Some(entry) = self.entries.get(alias) else {
            return Ok(None);
        };
        match &entry.public {
            Some(encoded) => Ok(Some(MasterKey::Public(PublicKey::from_base64(encoded)?))),
            None => Ok(None),
        }
    }

    /// Secret or private key stored under `alias`, unsealed with `password`
    pub fn key(&self, alias: &str, password: &str) -> Result<Option<MasterKey>> {
        let Some(entry) = self.entries.get(alias) else {
            return Ok(None);
        };
        let Some(sealed) = &entry.key else {
            return Ok(None);
        };

        let algorithm: KeyAlgorithm = entry.algorithm.parse()?;
        let material = sealed.open(password)?;
        let key = if algorithm.is_symmetric() {
            MasterKey::Symmetric(SymmetricKey::from_bytes(algorithm, &material)?)
        } else {
            MasterKey::Private(PrivateKey::from_bytes(&material)?)
        };
        Ok(Some(key))
    }
}

/// Programmatic keystore construction
#[derive(Debug, Default)]
pub struct KeystoreBuilder {
    entries: BTreeMap<String, KeystoreEntry>,
    store_password: Option<String>,
    kdf: KdfParams,
}

impl KeystoreBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from an existing keystore
    pub fn from_keystore(keystore: Keystore) -> Self {
        Self {
            entries: keystore.entries,
            store_password: None,
            kdf: KdfParams::default(),
        }
    }

    /// Argon2id costs for entries added from now on
    pub fn kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Protect the keystore with an integrity MAC under `password`
    pub fn store_password(mut self, password: impl Into<String>) -> Self {
        self.store_password = Some(password.into());
        self
    }

    /// Add a symmetric master key
    pub fn add_secret_key(&mut self, alias: &str, key: &SymmetricKey, password: &str) -> Result<()> {
        let entry = KeystoreEntry {
            algorithm: key.algorithm().name().to_string(),
            public: None,
            key: Some(SealedSecret::seal(password, key.as_bytes(), self.kdf)?),
        };
        self.insert(alias, entry)
    }

    /// Add an asymmetric key pair (public and private halves)
    pub fn add_key_pair(&mut self, alias: &str, private: &PrivateKey, password: &str) -> Result<()> {
        let entry = KeystoreEntry {
            algorithm: KeyAlgorithm::X25519.name().to_string(),
            public: Some(private.public_key().to_base64()),
            key: Some(SealedSecret::seal(password, private.as_bytes(), self.kdf)?),
        };
        self.insert(alias, entry)
    }

    /// Add only the private half of an asymmetric key
    pub fn add_private_key(&mut self, alias: &str, private: &PrivateKey, password: &str) -> Result<()> {
        let entry = KeystoreEntry {
            algorithm: KeyAlgorithm::X25519.name().to_string(),
            public: None,
            key: Some(SealedSecret::seal(password, private.as_bytes(), self.kdf)?),
        };
        self.insert(alias, entry)
    }

    /// Add only the public half of an asymmetric key
    pub fn add_public_key(&mut self, alias: &str, public: &PublicKey) -> Result<()> {
        let entry = KeystoreEntry {
            algorithm: KeyAlgorithm::X25519.name().to_string(),
            public: Some(public.to_base64()),
            key: None,
        };
        self.insert(alias, entry)
    }

    fn insert(&mut self, alias: &str, entry: KeystoreEntry) -> Result<()> {
        if alias.is_empty() {
            return Err(CryptoError::Keystore("alias must not be empty".to_string()));
        }
        if self.entries.contains_key(alias) {
            return Err(CryptoError::Keystore(format!("alias {:?} already exists", alias)));
        }
        self.entries.insert(alias.to_string(), entry);
        Ok(())
    }

    /// Write the keystore document
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mac = match &self.store_password {
            Some(password) => {
                let content = serde_json::to_vec(&self.entries)?;
                Some(hashing::keystore_mac(password, &content).to_hex().to_string())
            }
            None => None,
        };
        let document = KeystoreDocument {
            format: KEYSTORE_FORMAT.to_string(),
            entries: self.entries.clone(),
            mac,
        };
        serde_json::to_writer_pretty(writer, &document)?;
        Ok(())
    }

    /// Serialize the keystore document to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }
}
