//! Encryption of stored credentials.
//!
//! AES-256-GCM keyed by SHA-256 of the configured secret. Ciphertext is stored
//! as hex of `nonce || sealed`. An empty secret stores values unchanged.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use crate::errors::CatalogError;

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SecretBox {
    cipher: Option<Aes256Gcm>,
}

impl SecretBox {
    pub fn new(secret: &str) -> Self {
        if secret.is_empty() {
            return Self { cipher: None };
        }
        let key = Sha256::digest(secret.as_bytes());
        Self {
            cipher: Aes256Gcm::new_from_slice(&key).ok(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.cipher.is_none()
    }

    pub fn encrypt(&self, plain: &str) -> Result<String, CatalogError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plain.to_string());
        };
        if plain.is_empty() {
            return Ok(String::new());
        }
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plain.as_bytes())
            .map_err(|e| CatalogError::Crypto(e.to_string()))?;
        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&sealed);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CatalogError> {
        let Some(cipher) = &self.cipher else {
            return Ok(stored.to_string());
        };
        if stored.is_empty() {
            return Ok(String::new());
        }
        let bytes = hex::decode(stored).map_err(|e| CatalogError::Crypto(e.to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(CatalogError::Crypto("ciphertext too short".into()));
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CatalogError::Crypto("wrong secret or corrupted value".into()))?;
        String::from_utf8(plain).map_err(|e| CatalogError::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_secret_passes_through() {
        let b = SecretBox::new("");
        assert!(b.is_passthrough());
        assert_eq!(b.encrypt("hunter2").unwrap(), "hunter2");
        assert_eq!(b.decrypt("hunter2").unwrap(), "hunter2");
    }

    #[test]
    fn test_encrypt_hides_value_and_decrypts() {
        let b = SecretBox::new("server-secret");
        let sealed = b.encrypt("hunter2").unwrap();
        assert_ne!(sealed, "hunter2");
        assert!(sealed.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(b.decrypt(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_nonce_differs_per_encryption() {
        let b = SecretBox::new("server-secret");
        assert_ne!(b.encrypt("x").unwrap(), b.encrypt("x").unwrap());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = SecretBox::new("one").encrypt("hunter2").unwrap();
        let err = SecretBox::new("two").decrypt(&sealed).unwrap_err();
        assert!(matches!(err, CatalogError::Crypto(_)));
    }

    #[test]
    fn test_empty_value_stays_empty() {
        let b = SecretBox::new("server-secret");
        assert_eq!(b.encrypt("").unwrap(), "");
        assert_eq!(b.decrypt("").unwrap(), "");
    }
}
