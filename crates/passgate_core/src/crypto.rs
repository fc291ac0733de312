//! Key derivation and blob sealing for the credential store.
//!
//! Blob layout: `version (0x01) || nonce (12 bytes) || AES-256-GCM ciphertext+tag`.
//! The key comes from PBKDF2-HMAC-SHA256 over the master password and the store salt.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::Error;

pub const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

const BLOB_VERSION_1: u8 = 0x01;
const HEADER_SIZE: usize = 1 + NONCE_SIZE;

/// Symmetric store key; wiped from memory on drop.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; KEY_SIZE]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for DerivedKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derive the store key from the master password.
///
/// Same password, salt and iteration count always yield the same key.
pub fn derive_key(master_password: &str, salt: &[u8], iterations: u32) -> Result<DerivedKey, Error> {
    if master_password.is_empty() {
        return Err(Error::Authentication(
            "master password cannot be empty".to_string(),
        ));
    }
    if iterations == 0 {
        return Err(Error::Config(
            "key derivation needs at least one iteration".to_string(),
        ));
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(master_password.as_bytes(), salt, iterations, &mut key[..]);
    Ok(DerivedKey(key))
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Encryption(format!("invalid key: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| Error::Encryption(format!("seal failed: {}", e)))?;

    let mut blob = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    blob.push(BLOB_VERSION_1);
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`seal`].
///
/// A malformed header is an integrity error; a failed tag check means the key is wrong
/// or the ciphertext was modified, which is reported as an authentication error.
pub fn open(key: &DerivedKey, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    if blob.len() < HEADER_SIZE + TAG_SIZE {
        return Err(Error::Integrity(format!(
            "store blob too short ({} bytes)",
            blob.len()
        )));
    }
    if blob[0] != BLOB_VERSION_1 {
        return Err(Error::Integrity(format!(
            "unsupported store format version {:#04x}",
            blob[0]
        )));
    }

    let (nonce_bytes, ciphertext) = blob[1..].split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Encryption(format!("invalid key: {}", e)))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| {
            Error::Authentication("wrong master password or tampered credential store".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FAST_ITERATIONS: u32 = 1_000;

    fn key(password: &str) -> DerivedKey {
        derive_key(password, &[7u8; SALT_SIZE], FAST_ITERATIONS).unwrap()
    }

    #[rstest]
    #[case("correct horse battery staple", [1u8; SALT_SIZE])]
    #[case("ünïcødé-pässwörd", [0xAB; SALT_SIZE])]
    #[case("x", [0u8; SALT_SIZE])]
    fn test_derive_key_is_deterministic(#[case] password: &str, #[case] salt: [u8; SALT_SIZE]) {
        let first = derive_key(password, &salt, FAST_ITERATIONS).unwrap();
        let second = derive_key(password, &salt, FAST_ITERATIONS).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_derive_key_depends_on_salt_and_password() {
        let base = derive_key("password1", &[1u8; SALT_SIZE], FAST_ITERATIONS).unwrap();
        let other_salt = derive_key("password1", &[2u8; SALT_SIZE], FAST_ITERATIONS).unwrap();
        let other_password = derive_key("password2", &[1u8; SALT_SIZE], FAST_ITERATIONS).unwrap();

        assert_ne!(base.as_bytes(), other_salt.as_bytes());
        assert_ne!(base.as_bytes(), other_password.as_bytes());
    }

    #[test]
    fn test_derive_key_rejects_empty_password() {
        let result = derive_key("", &[1u8; SALT_SIZE], FAST_ITERATIONS);
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[test]
    fn test_derive_key_rejects_zero_iterations() {
        let result = derive_key("password1", &[1u8; SALT_SIZE], 0);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = key("master-password");
        let blob = seal(&key, b"{\"example.com\":{}}").unwrap();

        assert_eq!(blob[0], BLOB_VERSION_1);
        assert_eq!(blob.len(), HEADER_SIZE + 18 + TAG_SIZE);

        let plaintext = open(&key, &blob).unwrap();
        assert_eq!(plaintext.as_slice(), b"{\"example.com\":{}}");
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let key = key("master-password");
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_with_wrong_key_fails_authentication() {
        let blob = seal(&key("right-password"), b"secret").unwrap();
        let result = open(&key("wrong-password"), &blob);
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[test]
    fn test_open_detects_tampering() {
        let key = key("master-password");
        let mut blob = seal(&key, b"secret records").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(open(&key, &blob), Err(Error::Authentication(_))));
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::header_only(vec![BLOB_VERSION_1; HEADER_SIZE])]
    #[case::unknown_version({ let mut b = vec![0u8; 64]; b[0] = 0x02; b })]
    fn test_open_rejects_malformed_blobs(#[case] blob: Vec<u8>) {
        assert!(matches!(open(&key("pw"), &blob), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", key("pw")), "DerivedKey([REDACTED])");
    }
}
