//! X25519 sealed boxes for asymmetric master keys
//!
//! A sealed box is `ephemeral_public (32) || nonce (12) || AES-256-GCM ciphertext`.
//! The AEAD key is derived with BLAKE3 from the X25519 shared secret bound to
//! both public keys, so only the holder of the recipient's private key can open it.

use crate::keys::{PrivateKey, PublicKey, X25519_KEY_SIZE};
use crate::{CryptoError, Result};
use aes_gcm::{aead::Aead as AeadTrait, Aes256Gcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

/// Derivation context for sealed box keys
pub const SEALING_CONTEXT: &str = "sealstore x25519 sealed key v1";

/// Size of the AES-GCM nonce
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed box adds on top of its plaintext
pub const SEAL_OVERHEAD: usize = X25519_KEY_SIZE + NONCE_SIZE + TAG_SIZE;

/// Seal `plaintext` for the holder of `recipient`'s private key
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519Public::from(&ephemeral_secret);

    let recipient_x25519 = X25519Public::from(*recipient.as_bytes());
    let shared_secret = ephemeral_secret.diffie_hellman(&recipient_x25519);
    let key = derive_sealing_key(
        shared_secret.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.as_bytes(),
    );

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut sealed = Vec::with_capacity(SEAL_OVERHEAD + plaintext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed box with the recipient's private key
pub fn open(private: &PrivateKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::Decryption(format!(
            "sealed data must be at least {} bytes, got {}",
            SEAL_OVERHEAD,
            sealed.len()
        )));
    }
    let (ephemeral_bytes, rest) = sealed.split_at(X25519_KEY_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let mut ephemeral = [0u8; X25519_KEY_SIZE];
    ephemeral.copy_from_slice(ephemeral_bytes);

    let recipient_secret = StaticSecret::from(*private.as_bytes());
    let recipient_public = X25519Public::from(&recipient_secret);
    let shared_secret = recipient_secret.diffie_hellman(&X25519Public::from(ephemeral));
    let key = derive_sealing_key(
        shared_secret.as_bytes(),
        &ephemeral,
        recipient_public.as_bytes(),
    );

    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption("sealed data authentication failed".to_string()))
}

fn derive_sealing_key(
    shared_secret: &[u8],
    ephemeral_public: &[u8],
    recipient_public: &[u8],
) -> Zeroizing<[u8; 32]> {
    let mut material = Zeroizing::new(Vec::with_capacity(3 * X25519_KEY_SIZE));
    material.extend_from_slice(shared_secret);
    material.extend_from_slice(ephemeral_public);
    material.extend_from_slice(recipient_public);
    Zeroizing::new(blake3::derive_key(SEALING_CONTEXT, &material))
}
