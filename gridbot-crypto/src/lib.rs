//! Credential encryption at rest (spec.md §6.5): AES-256-GCM, wire format
//! `iv:authTag:ciphertext`, each segment base64. The only crate this
//! workspace imports that is not already somewhere in the teacher's
//! dependency graph — `aes-gcm` is the standard RustCrypto AEAD primitive,
//! reached for because the teacher has no credential-at-rest story at all.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key must be 32 bytes, base64-encoded")]
    InvalidKey,
    #[error("malformed ciphertext: expected iv:authTag:ciphertext")]
    MalformedCiphertext,
    #[error("encryption failed")]
    EncryptFailed,
    /// Decryption failure at account load is fatal (spec.md §6.5) — callers
    /// must not swallow this and fall back to anything.
    #[error("decryption failed: credentials are unreadable")]
    DecryptFailed,
}

/// Holds a loaded AES-256-GCM key and performs encrypt/decrypt against the
/// `iv:authTag:ciphertext` wire format. One instance per process; the key
/// is read once from `CREDENTIALS_ENCRYPTION_KEY` at startup.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// `key_b64` must decode to exactly 32 bytes.
    pub fn new(key_b64: &str) -> Result<Self, CryptoError> {
        let key_bytes = STANDARD.decode(key_b64).map_err(|_| CryptoError::InvalidKey)?;
        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKey);
        }
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    /// Encrypts `plaintext` under a fresh random IV (spec.md §8: "encrypting
    /// the same plaintext twice yields different ciphertexts").
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut iv = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let combined = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;
        let split_at = combined.len() - TAG_LEN;
        let (ciphertext, tag) = combined.split_at(split_at);

        Ok(format!(
            "{}:{}:{}",
            STANDARD.encode(iv),
            STANDARD.encode(tag),
            STANDARD.encode(ciphertext),
        ))
    }

    /// Ciphertext is NOT valid JSON — a colon split must yield exactly 3
    /// parts (spec.md §6.5); anything else is malformed, not a decrypt
    /// attempt gone wrong.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let parts: Vec<&str> = encoded.split(':').collect();
        let [iv_b64, tag_b64, ciphertext_b64] = parts[..] else {
            return Err(CryptoError::MalformedCiphertext);
        };

        let iv = STANDARD.decode(iv_b64).map_err(|_| CryptoError::MalformedCiphertext)?;
        let tag = STANDARD.decode(tag_b64).map_err(|_| CryptoError::MalformedCiphertext)?;
        let ciphertext = STANDARD.decode(ciphertext_b64).map_err(|_| CryptoError::MalformedCiphertext)?;
        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }

        let nonce = Nonce::from_slice(&iv);
        let mut combined = ciphertext;
        combined.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(nonce, combined.as_ref())
            .map_err(|_| CryptoError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        STANDARD.encode([7u8; 32])
    }

    #[test]
    fn round_trips_through_encrypt_then_decrypt() {
        let cipher = CredentialCipher::new(&test_key()).unwrap();
        let encoded = cipher.encrypt("api-key:api-secret").unwrap();
        assert_eq!(cipher.decrypt(&encoded).unwrap(), "api-key:api-secret");
    }

    #[test]
    fn same_plaintext_twice_yields_different_ciphertexts_both_decryptable() {
        let cipher = CredentialCipher::new(&test_key()).unwrap();
        let a = cipher.encrypt("secret").unwrap();
        let b = cipher.encrypt("secret").unwrap();
        assert_ne!(a, b, "random IV must vary the ciphertext");
        assert_eq!(cipher.decrypt(&a).unwrap(), "secret");
        assert_eq!(cipher.decrypt(&b).unwrap(), "secret");
    }

    #[test]
    fn wire_format_has_exactly_three_colon_separated_segments() {
        let cipher = CredentialCipher::new(&test_key()).unwrap();
        let encoded = cipher.encrypt("x").unwrap();
        assert_eq!(encoded.split(':').count(), 3);
    }

    #[test]
    fn tampered_ciphertext_fails_auth_tag_verification() {
        let cipher = CredentialCipher::new(&test_key()).unwrap();
        let encoded = cipher.encrypt("secret").unwrap();
        let parts: Vec<&str> = encoded.split(':').collect();
        let mut ciphertext_bytes = STANDARD.decode(parts[2]).unwrap();
        ciphertext_bytes[0] ^= 0xFF;
        let tampered = format!("{}:{}:{}", parts[0], parts[1], STANDARD.encode(ciphertext_bytes));
        assert_eq!(cipher.decrypt(&tampered), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn rejects_a_key_that_is_not_32_bytes() {
        let short_key = STANDARD.encode([1u8; 16]);
        assert_eq!(CredentialCipher::new(&short_key).unwrap_err(), CryptoError::InvalidKey);
    }
}
