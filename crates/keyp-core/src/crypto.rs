//! Cryptographic envelope for vault security
//!
//! - AES-256-GCM for authenticated encryption of single values
//! - PBKDF2-HMAC-SHA-256 for passphrase-based key derivation
//! - Secure memory handling with zeroization

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes
pub const IV_SIZE: usize = 12;

/// Size of PBKDF2 salt in bytes
pub const SALT_SIZE: usize = 32;

/// Size of the GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Minimum permitted PBKDF2 iteration count
pub const MIN_ITERATIONS: u32 = 100_000;

/// A 256-bit key derived from the master passphrase.
///
/// The buffer is overwritten when the value is dropped. The key is never
/// serialized, logged, or exposed through `Debug`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    /// Wrap raw key bytes. Fails unless exactly 32 bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidParams(format!(
                "key must be {KEY_SIZE} bytes"
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Parse a key from its lowercase hex form (disk session format).
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let mut bytes = hex::decode(s)
            .map_err(|_| CryptoError::InvalidParams("key is not valid hex".to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Lowercase hex form, for the disk session file.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Clone for DerivedKey {
    // The handle caches one copy of the vault's key for the
    // unlock-with-key fast path; both copies zeroize on drop.
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Everything needed to decrypt a value sealed with [`seal`].
pub struct SealedValue {
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
    pub iv: [u8; IV_SIZE],
    pub salt: [u8; SALT_SIZE],
}

/// Derive a 256-bit key from a passphrase using PBKDF2-HMAC-SHA-256.
///
/// Deterministic: the same passphrase, salt, and iteration count always
/// yield the same key.
pub fn derive_key(passphrase: &[u8], salt: &[u8], iterations: u32) -> CryptoResult<DerivedKey> {
    if iterations < MIN_ITERATIONS {
        return Err(CryptoError::InvalidParams(format!(
            "iterations must be at least {MIN_ITERATIONS}"
        )));
    }
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidParams(format!(
            "salt must be {SALT_SIZE} bytes"
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase, salt, iterations, &mut key);
    let derived = DerivedKey(key);
    key.zeroize();
    Ok(derived)
}

/// Encrypt a plaintext under a passphrase with a fresh salt and nonce.
///
/// Every call draws a new 32-byte salt and 12-byte nonce from the OS RNG,
/// so two seals of the same input never produce the same output.
pub fn seal(plaintext: &[u8], passphrase: &[u8], iterations: u32) -> CryptoResult<SealedValue> {
    let salt = generate_salt();
    let key = derive_key(passphrase, &salt, iterations)?;

    let (ciphertext, tag, iv) = seal_with_key(&key, plaintext)?;
    Ok(SealedValue {
        ciphertext,
        tag,
        iv,
        salt,
    })
}

/// Decrypt a value produced by [`seal`].
///
/// A wrong passphrase and a tampered ciphertext both surface as the same
/// [`CryptoError::AuthFailure`].
pub fn open(sealed: &SealedValue, passphrase: &[u8], iterations: u32) -> CryptoResult<Vec<u8>> {
    let key = derive_key(passphrase, &sealed.salt, iterations)?;
    open_with_key(&key, &sealed.ciphertext, &sealed.tag, &sealed.iv)
}

/// Encrypt a value under an already-derived key with a fresh nonce.
///
/// Returns `(ciphertext, tag, iv)` with the tag split off the GCM output.
pub fn seal_with_key(
    key: &DerivedKey,
    plaintext: &[u8],
) -> CryptoResult<(Vec<u8>, [u8; TAG_SIZE], [u8; IV_SIZE])> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    let iv = generate_iv();
    let nonce = Nonce::from_slice(&iv);

    // GCM appends the auth tag to the ciphertext
    let mut sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    let tag_start = sealed.len() - TAG_SIZE;
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&sealed[tag_start..]);
    sealed.truncate(tag_start);

    Ok((sealed, tag, iv))
}

/// Decrypt a value under an already-derived key.
pub fn open_with_key(
    key: &DerivedKey,
    ciphertext: &[u8],
    tag: &[u8],
    iv: &[u8],
) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::AuthFailure);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    // Reconstruct the sealed message (ciphertext followed by auth tag)
    let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(nonce, sealed.as_slice())
        .map_err(|_| CryptoError::AuthFailure)
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a cryptographically secure random nonce
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation_deterministic() {
        let salt = generate_salt();

        let key1 = derive_key(b"test-passphrase", &salt, MIN_ITERATIONS).unwrap();
        let key2 = derive_key(b"test-passphrase", &salt, MIN_ITERATIONS).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_key_derivation_rejects_weak_params() {
        let salt = generate_salt();

        assert!(derive_key(b"p", &salt, MIN_ITERATIONS - 1).is_err());
        assert!(derive_key(b"p", &salt[..16], MIN_ITERATIONS).is_err());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        for plaintext in [
            &b""[..],
            &b"Hello, secure world!"[..],
            "\u{1f510} uni\u{00e7}ode".as_bytes(),
        ] {
            let sealed = seal(plaintext, b"test-passphrase", MIN_ITERATIONS).unwrap();
            let opened = open(&sealed, b"test-passphrase", MIN_ITERATIONS).unwrap();
            assert_eq!(plaintext, opened.as_slice());
        }
    }

    #[test]
    fn test_seal_open_roundtrip_large() {
        let plaintext = vec![0xA7u8; 10_000];
        let sealed = seal(&plaintext, b"test-passphrase", MIN_ITERATIONS).unwrap();
        let opened = open(&sealed, b"test-passphrase", MIN_ITERATIONS).unwrap();
        assert_eq!(plaintext, opened);
    }

    #[test]
    fn test_seal_freshness() {
        let sealed1 = seal(b"same input", b"same pass", MIN_ITERATIONS).unwrap();
        let sealed2 = seal(b"same input", b"same pass", MIN_ITERATIONS).unwrap();

        assert_ne!(sealed1.salt, sealed2.salt);
        assert_ne!(sealed1.iv, sealed2.iv);
        assert_ne!(sealed1.ciphertext, sealed2.ciphertext);

        assert_eq!(
            open(&sealed1, b"same pass", MIN_ITERATIONS).unwrap(),
            open(&sealed2, b"same pass", MIN_ITERATIONS).unwrap(),
        );
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = seal(b"secret data", b"passphrase1", MIN_ITERATIONS).unwrap();
        let result = open(&sealed, b"passphrase2", MIN_ITERATIONS);
        assert!(matches!(result, Err(CryptoError::AuthFailure)));
    }

    #[test]
    fn test_tampered_tag_indistinguishable_from_wrong_passphrase() {
        let mut sealed = seal(b"secret data", b"passphrase", MIN_ITERATIONS).unwrap();
        sealed.tag[0] ^= 0x01;
        let tampered = open(&sealed, b"passphrase", MIN_ITERATIONS);

        let sealed2 = seal(b"secret data", b"passphrase", MIN_ITERATIONS).unwrap();
        let wrong_pass = open(&sealed2, b"not the passphrase", MIN_ITERATIONS);

        // Both fail with the same variant so callers cannot tell wrong-key
        // from tampering.
        assert!(matches!(tampered, Err(CryptoError::AuthFailure)));
        assert!(matches!(wrong_pass, Err(CryptoError::AuthFailure)));
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let salt = generate_salt();
        let key = derive_key(b"p", &salt, MIN_ITERATIONS).unwrap();

        let restored = DerivedKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.as_bytes(), restored.as_bytes());
    }

    #[test]
    fn test_key_hex_rejects_garbage() {
        assert!(DerivedKey::from_hex("not hex").is_err());
        assert!(DerivedKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_salt_and_iv_uniqueness() {
        assert_ne!(generate_salt(), generate_salt());
        assert_ne!(generate_iv(), generate_iv());
    }
}
