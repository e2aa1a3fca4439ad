//! Hashing helpers built on BLAKE3
//!
//! Check values let cluster members compare master key material without ever
//! exchanging the keys themselves.

use crate::keys::KeyAlgorithm;

/// Derivation context for master key check values
pub const CHECK_VALUE_CONTEXT: &str = "sealstore master key check value v1";

/// Derivation context for the keystore integrity key
pub const KEYSTORE_MAC_CONTEXT: &str = "sealstore keystore integrity v1";

/// Number of digest bytes kept in a check value
const CHECK_VALUE_DIGEST_LEN: usize = 16;

/// Compute the check value for raw key material: `<ALG>#<hex digest>`
pub fn check_value(algorithm: KeyAlgorithm, key_material: &[u8]) -> String {
    let digest = blake3::derive_key(CHECK_VALUE_CONTEXT, key_material);
    format!(
        "{}#{}",
        algorithm.name(),
        hex::encode(&digest[..CHECK_VALUE_DIGEST_LEN])
    )
}

/// Keyed MAC over keystore contents
pub fn keystore_mac(store_password: &str, content: &[u8]) -> blake3::Hash {
    let key = blake3::derive_key(KEYSTORE_MAC_CONTEXT, store_password.as_bytes());
    blake3::keyed_hash(&key, content)
}

/// Verify a hex-encoded keystore MAC in constant time
pub fn verify_keystore_mac(store_password: &str, content: &[u8], expected_hex: &str) -> bool {
    match blake3::Hash::from_hex(expected_hex) {
        Ok(expected) => keystore_mac(store_password, content) == expected,
        Err(_) => false,
    }
}
