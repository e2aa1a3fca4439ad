//! Cipher adapter
//!
//! Turns key material into an initialized [`Cipher`] for a given [`CipherMode`].
//! The cipher is incremental: callers feed data through [`Cipher::update`] and
//! complete the operation with [`Cipher::finalize`], sizing their output buffers
//! with [`Cipher::output_size`].
//!
//! | Key                | Engine                                   | Block size |
//! |--------------------|------------------------------------------|------------|
//! | AES 128/192/256    | CBC, PKCS#7 padding, all-zero IV         | 16         |
//! | ChaCha20 256       | stream, all-zero nonce                   | 0          |
//! | X25519 master key  | sealed box over the complete input       | 0          |
//!
//! Content keys are never reused, so a fixed IV or nonce does not repeat a
//! keystream across objects.

use crate::keys::{KeyAlgorithm, MasterKey, PrivateKey, PublicKey, SymmetricKey};
use crate::sealing::{self, SEAL_OVERHEAD};
use crate::{CryptoError, Result};
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use zeroize::Zeroizing;

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// Nonce size of the ChaCha20 stream cipher
const CHACHA20_NONCE_SIZE: usize = 12;

/// Direction of a cipher
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherMode {
    /// Transform plaintext into ciphertext
    Encrypt,
    /// Transform ciphertext into plaintext
    Decrypt,
}

impl CipherMode {
    fn name(&self) -> &'static str {
        match self {
            Self::Encrypt => "encryption",
            Self::Decrypt => "decryption",
        }
    }
}

/// Borrowed key material a cipher can be initialized with
#[derive(Clone, Copy, Debug)]
pub enum CipherKey<'a> {
    /// Content key or symmetric master key
    Symmetric(&'a SymmetricKey),
    /// Public half of an asymmetric master key
    Public(&'a PublicKey),
    /// Private half of an asymmetric master key
    Private(&'a PrivateKey),
}

impl<'a> From<&'a SymmetricKey> for CipherKey<'a> {
    fn from(key: &'a SymmetricKey) -> Self {
        Self::Symmetric(key)
    }
}

impl<'a> From<&'a MasterKey> for CipherKey<'a> {
    fn from(key: &'a MasterKey) -> Self {
        match key {
            MasterKey::Symmetric(key) => Self::Symmetric(key),
            MasterKey::Public(key) => Self::Public(key),
            MasterKey::Private(key) => Self::Private(key),
        }
    }
}

/// Produce a cipher initialized for `mode` with `key`
pub fn initialized_cipher<'a>(key: impl Into<CipherKey<'a>>, mode: CipherMode) -> Result<Cipher> {
    let key = key.into();
    let engine = match key {
        CipherKey::Symmetric(key) => match key.algorithm() {
            KeyAlgorithm::Aes => Engine::Cbc(CbcEngine::new(key.as_bytes())?),
            KeyAlgorithm::ChaCha20 => {
                let stream =
                    ChaCha20::new_from_slices(key.as_bytes(), &[0u8; CHACHA20_NONCE_SIZE])
                        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Engine::Stream(Box::new(stream))
            }
            KeyAlgorithm::X25519 => {
                return Err(CryptoError::UnsupportedAlgorithm(
                    "X25519 is not a symmetric algorithm".to_string(),
                ))
            }
        },
        CipherKey::Public(public) => {
            if mode != CipherMode::Encrypt {
                return Err(CryptoError::UnusableKey {
                    mode: mode.name(),
                    reason: "a public key can only encrypt".to_string(),
                });
            }
            Engine::Sealed(SealedEngine::new(SealedKey::Public(public.clone())))
        }
        CipherKey::Private(private) => {
            if mode != CipherMode::Decrypt {
                return Err(CryptoError::UnusableKey {
                    mode: mode.name(),
                    reason: "a private key can only decrypt".to_string(),
                });
            }
            Engine::Sealed(SealedEngine::new(SealedKey::Private(private.clone())))
        }
    };

    Ok(Cipher {
        mode,
        engine,
        finalized: false,
    })
}

/// Encrypt a content key with a master key
pub fn wrap_key(master_key: &MasterKey, key: &SymmetricKey) -> Result<Vec<u8>> {
    initialized_cipher(master_key, CipherMode::Encrypt)?.do_final(key.as_bytes())
}

/// Decrypt a wrapped content key with a master key
pub fn unwrap_key(
    master_key: &MasterKey,
    algorithm: KeyAlgorithm,
    wrapped: &[u8],
) -> Result<SymmetricKey> {
    let bytes = Zeroizing::new(
        initialized_cipher(master_key, CipherMode::Decrypt)?.do_final(wrapped)?,
    );
    SymmetricKey::from_bytes(algorithm, &bytes)
}

/// An initialized, incremental cipher
pub struct Cipher {
    mode: CipherMode,
    engine: Engine,
    finalized: bool,
}

impl Cipher {
    /// Direction this cipher was initialized for
    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Block size in bytes; 0 for stream and sealing engines
    pub fn block_size(&self) -> usize {
        match &self.engine {
            Engine::Cbc(_) => AES_BLOCK_SIZE,
            Engine::Stream(_) | Engine::Sealed(_) => 0,
        }
    }

    /// Upper bound of the output produced by feeding `input_len` more bytes and finalizing
    pub fn output_size(&self, input_len: usize) -> usize {
        match &self.engine {
            Engine::Cbc(cbc) => cbc.output_size(self.mode, input_len),
            Engine::Stream(_) => input_len,
            Engine::Sealed(sealed) => {
                let total = sealed.buffer.len() + input_len;
                match self.mode {
                    CipherMode::Encrypt => total + SEAL_OVERHEAD,
                    CipherMode::Decrypt => total,
                }
            }
        }
    }

    /// Feed `input` through the cipher, writing any completed output to `output`.
    ///
    /// Returns the number of bytes written. `output` must hold at least
    /// [`Cipher::output_size`] bytes for `input.len()`.
    pub fn update(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        if self.finalized {
            return Err(CryptoError::Finalized);
        }
        match &mut self.engine {
            Engine::Cbc(cbc) => cbc.update(self.mode, input, output),
            Engine::Stream(stream) => {
                if output.len() < input.len() {
                    return Err(CryptoError::ShortBuffer {
                        required: input.len(),
                        available: output.len(),
                    });
                }
                let out = &mut output[..input.len()];
                out.copy_from_slice(input);
                stream
                    .try_apply_keystream(out)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                Ok(input.len())
            }
            Engine::Sealed(sealed) => {
                sealed.buffer.extend_from_slice(input);
                Ok(0)
            }
        }
    }

    /// Complete the operation, writing any remaining output to `output`
    pub fn finalize(&mut self, output: &mut [u8]) -> Result<usize> {
        if self.finalized {
            return Err(CryptoError::Finalized);
        }
        let written = match &mut self.engine {
            Engine::Cbc(cbc) => cbc.finalize(self.mode, output)?,
            Engine::Stream(_) => 0,
            Engine::Sealed(sealed) => sealed.finalize(output)?,
        };
        self.finalized = true;
        Ok(written)
    }

    /// Process `input` in full and finalize
    pub fn do_final(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; self.output_size(input.len())];
        let mut written = self.update(input, &mut output)?;
        written += self.finalize(&mut output[written..])?;
        output.truncate(written);
        Ok(output)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engine = match &self.engine {
            Engine::Cbc(_) => "AES/CBC/PKCS7",
            Engine::Stream(_) => "ChaCha20",
            Engine::Sealed(_) => "X25519-sealed",
        };
        f.debug_struct("Cipher")
            .field("engine", &engine)
            .field("mode", &self.mode)
            .field("finalized", &self.finalized)
            .finish()
    }
}

enum Engine {
    Cbc(CbcEngine),
    Stream(Box<ChaCha20>),
    Sealed(SealedEngine),
}

enum AesCore {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesCore {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |e: aes::cipher::InvalidLength| CryptoError::InvalidKey(e.to_string());
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            len => Err(CryptoError::InvalidKey(format!(
                "AES key must be 16, 24 or 32 bytes, got {}",
                len
            ))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes192(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// AES in CBC mode with PKCS#7 padding.
///
/// Encryption emits every complete block and keeps the remainder. Decryption
/// additionally holds back the final complete block until `finalize`, since it
/// carries the padding.
struct CbcEngine {
    core: AesCore,
    chain: [u8; AES_BLOCK_SIZE],
    pending: Zeroizing<Vec<u8>>,
}

impl CbcEngine {
    fn new(key: &[u8]) -> Result<Self> {
        Ok(Self {
            core: AesCore::new(key)?,
            chain: [0u8; AES_BLOCK_SIZE],
            pending: Zeroizing::new(Vec::with_capacity(AES_BLOCK_SIZE)),
        })
    }

    fn output_size(&self, mode: CipherMode, input_len: usize) -> usize {
        let total = self.pending.len() + input_len;
        match mode {
            CipherMode::Encrypt => (total / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE,
            CipherMode::Decrypt => total,
        }
    }

    /// Number of buffered bytes an update may process
    fn processable(&self, mode: CipherMode, input_len: usize) -> usize {
        let total = self.pending.len() + input_len;
        let full = total / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
        match mode {
            CipherMode::Decrypt if full == total && full > 0 => full - AES_BLOCK_SIZE,
            _ => full,
        }
    }

    fn update(&mut self, mode: CipherMode, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let process = self.processable(mode, input.len());
        if output.len() < process {
            return Err(CryptoError::ShortBuffer {
                required: process,
                available: output.len(),
            });
        }

        self.pending.extend_from_slice(input);
        let mut block = [0u8; AES_BLOCK_SIZE];
        for offset in (0..process).step_by(AES_BLOCK_SIZE) {
            block.copy_from_slice(&self.pending[offset..offset + AES_BLOCK_SIZE]);
            self.transform(mode, &mut block);
            output[offset..offset + AES_BLOCK_SIZE].copy_from_slice(&block);
        }
        self.pending.drain(..process);
        Ok(process)
    }

    fn finalize(&mut self, mode: CipherMode, output: &mut [u8]) -> Result<usize> {
        match mode {
            CipherMode::Encrypt => {
                if output.len() < AES_BLOCK_SIZE {
                    return Err(CryptoError::ShortBuffer {
                        required: AES_BLOCK_SIZE,
                        available: output.len(),
                    });
                }
                let pad = AES_BLOCK_SIZE - self.pending.len();
                let mut block = [pad as u8; AES_BLOCK_SIZE];
                block[..self.pending.len()].copy_from_slice(&self.pending);
                self.pending.clear();
                self.transform(mode, &mut block);
                output[..AES_BLOCK_SIZE].copy_from_slice(&block);
                Ok(AES_BLOCK_SIZE)
            }
            CipherMode::Decrypt => {
                if self.pending.len() != AES_BLOCK_SIZE {
                    return Err(CryptoError::IllegalBlockSize {
                        len: self.pending.len(),
                        block_size: AES_BLOCK_SIZE,
                    });
                }
                let mut block = [0u8; AES_BLOCK_SIZE];
                block.copy_from_slice(&self.pending);
                self.pending.clear();
                self.transform(mode, &mut block);

                let pad = block[AES_BLOCK_SIZE - 1] as usize;
                if pad == 0
                    || pad > AES_BLOCK_SIZE
                    || !block[AES_BLOCK_SIZE - pad..].iter().all(|&b| b as usize == pad)
                {
                    return Err(CryptoError::BadPadding);
                }
                let len = AES_BLOCK_SIZE - pad;
                if output.len() < len {
                    return Err(CryptoError::ShortBuffer {
                        required: len,
                        available: output.len(),
                    });
                }
                output[..len].copy_from_slice(&block[..len]);
                Ok(len)
            }
        }
    }

    fn transform(&mut self, mode: CipherMode, block: &mut [u8; AES_BLOCK_SIZE]) {
        match mode {
            CipherMode::Encrypt => {
                for (b, c) in block.iter_mut().zip(self.chain.iter()) {
                    *b ^= c;
                }
                self.core.encrypt_block(block);
                self.chain = *block;
            }
            CipherMode::Decrypt => {
                let ciphertext = *block;
                self.core.decrypt_block(block);
                for (b, c) in block.iter_mut().zip(self.chain.iter()) {
                    *b ^= c;
                }
                self.chain = ciphertext;
            }
        }
    }
}

enum SealedKey {
    Public(PublicKey),
    Private(PrivateKey),
}

/// Buffers the complete input and seals or opens it on finalize
struct SealedEngine {
    key: SealedKey,
    buffer: Zeroizing<Vec<u8>>,
}

impl SealedEngine {
    fn new(key: SealedKey) -> Self {
        Self {
            key,
            buffer: Zeroizing::new(Vec::new()),
        }
    }

    fn finalize(&mut self, output: &mut [u8]) -> Result<usize> {
        let result = Zeroizing::new(match &self.key {
            SealedKey::Public(public) => sealing::seal(public, &self.buffer)?,
            SealedKey::Private(private) => sealing::open(private, &self.buffer)?,
        });
        self.buffer.clear();
        if output.len() < result.len() {
            return Err(CryptoError::ShortBuffer {
                required: result.len(),
                available: output.len(),
            });
        }
        output[..result.len()].copy_from_slice(&result);
        Ok(result.len())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn cbc_roundtrip_any_chunking(
            data in proptest::collection::vec(any::<u8>(), 0..600),
            chunk in 1usize..64,
        ) {
            let key = SymmetricKey::generate(KeyAlgorithm::Aes, 128).unwrap();
            let ciphertext = initialized_cipher(&key, CipherMode::Encrypt)
                .unwrap()
                .do_final(&data)
                .unwrap();
            prop_assert_eq!(ciphertext.len(), (data.len() / 16 + 1) * 16);

            let mut cipher = initialized_cipher(&key, CipherMode::Decrypt).unwrap();
            let mut plaintext = Vec::new();
            for piece in ciphertext.chunks(chunk) {
                let mut out = vec![0u8; cipher.output_size(piece.len())];
                let n = cipher.update(piece, &mut out).unwrap();
                plaintext.extend_from_slice(&out[..n]);
            }
            let mut out = vec![0u8; cipher.output_size(0)];
            let n = cipher.finalize(&mut out).unwrap();
            plaintext.extend_from_slice(&out[..n]);

            prop_assert_eq!(plaintext, data);
        }
    }
}
