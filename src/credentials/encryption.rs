//! AES-256-GCM encryption for credential tokens.
//!
//! Each token is encrypted with a unique random nonce. The nonce is prepended
//! to the ciphertext and the pair is base64-encoded into a single stored
//! value. The master key must be 32 bytes (256 bits) and arrives base64-encoded
//! from the deployment configuration.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{Error, Result};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Validates that the master key is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64)
        .map_err(|e| Error::Crypto(format!("master key is not valid base64: {e}")))?;

    if key_bytes.len() != KEY_SIZE {
        return Err(Error::Crypto(format!(
            "master key must be {} bytes (256 bits), got {}",
            KEY_SIZE,
            key_bytes.len()
        )));
    }

    Ok(key_bytes)
}

/// Encrypts plaintext using AES-256-GCM with a fresh random nonce.
///
/// Returns `base64(nonce || ciphertext)`. Encrypting the same input twice
/// yields different output because the nonce is drawn anew every call.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(Error::Crypto(format!(
            "encryption key must be {KEY_SIZE} bytes"
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("failed to create cipher: {e}")))?;

    // Never reuse a nonce
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&blob))
}

/// Decrypts a value produced by [`encrypt`].
///
/// Fails with [`Error::Crypto`] on a wrong key, corrupted data, or tampering —
/// authenticated encryption never silently returns garbage.
pub fn decrypt(encoded: &str, key: &[u8]) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(Error::Crypto(format!(
            "encryption key must be {KEY_SIZE} bytes"
        )));
    }

    let blob = BASE64
        .decode(encoded)
        .map_err(|e| Error::Crypto(format!("stored token is not valid base64: {e}")))?;

    if blob.len() <= NONCE_SIZE {
        return Err(Error::Crypto(format!(
            "stored token too short: {} bytes",
            blob.len()
        )));
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("failed to create cipher: {e}")))?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::Crypto("decryption failed (wrong key or tampered data)".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| Error::Crypto(format!("decrypted data is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        let valid_key = BASE64.encode([0u8; 32]);
        assert!(validate_key(&valid_key).is_ok());

        let short_key = BASE64.encode([0u8; 16]);
        assert!(validate_key(&short_key).is_err());

        let long_key = BASE64.encode([0u8; 64]);
        assert!(validate_key(&long_key).is_err());

        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0u8; 32];
        let plaintext = "my-secret-access-token-12345";

        let encoded = encrypt(plaintext, &key).expect("Encryption failed");
        assert_ne!(encoded, plaintext);

        let decrypted = decrypt(&encoded, &key).expect("Decryption failed");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let key = [0u8; 32];
        let plaintext = "same-plaintext";

        let first = encrypt(plaintext, &key).unwrap();
        let second = encrypt(plaintext, &key).unwrap();

        // Random nonces mean the stored values never repeat
        assert_ne!(first, second);

        assert_eq!(decrypt(&first, &key).unwrap(), plaintext);
        assert_eq!(decrypt(&second, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = [0u8; 32];
        let key2 = [1u8; 32];

        let encoded = encrypt("secret", &key1).unwrap();
        let result = decrypt(&encoded, &key2);
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [0u8; 32];

        let encoded = encrypt("secret", &key).unwrap();
        let mut blob = BASE64.decode(&encoded).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        let tampered = BASE64.encode(&blob);

        let result = decrypt(&tampered, &key);
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let key = [0u8; 32];
        let truncated = BASE64.encode([0u8; 8]);
        assert!(matches!(decrypt(&truncated, &key), Err(Error::Crypto(_))));
    }
}
