//! Authenticated symmetric encryption for preference values and SMTP
//! credentials.
//!
//! Uses `aes-gcm` for this exact shape ("authenticated symmetric
//! encryption with a 32-byte key").

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::AppError;

const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

/// `Encrypt(text) -> hex-ciphertext`, `Decrypt(hex-ciphertext) -> text`.
pub trait Crypter: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> crate::Result<String>;
    fn decrypt(&self, hex_ciphertext: &str) -> crate::Result<String>;
}

/// AES-256-GCM with a random 12-byte nonce prepended to the ciphertext,
/// the whole thing hex-encoded. The key is a process-wide secret loaded
/// at startup.
pub struct AesGcmCrypter {
    cipher: Aes256Gcm,
}

impl AesGcmCrypter {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn from_slice(key: &[u8]) -> crate::Result<Self> {
        if key.len() != KEY_LEN {
            return Err(AppError::invalid(format!(
                "crypter secret must be exactly {KEY_LEN} bytes, got {}",
                key.len()
            ))
            .into());
        }
        let mut fixed = [0u8; KEY_LEN];
        fixed.copy_from_slice(key);
        Ok(Self::new(&fixed))
    }
}

impl Crypter for AesGcmCrypter {
    fn encrypt(&self, plaintext: &str) -> crate::Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AppError::internal(format!("encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(hex_encode(&combined))
    }

    fn decrypt(&self, hex_ciphertext: &str) -> crate::Result<String> {
        let combined = hex_decode(hex_ciphertext)
            .map_err(|e| AppError::invalid(format!("invalid hex ciphertext: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(AppError::invalid("ciphertext too short to contain a nonce").into());
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AppError::invalid(format!("decryption failed: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| AppError::invalid(format!("decrypted data is not valid UTF-8: {e}")).into())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd-length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_LEN] {
        [7u8; KEY_LEN]
    }

    #[test]
    fn decrypt_of_encrypt_round_trips_for_utf8_strings() {
        let crypter = AesGcmCrypter::new(&test_key());
        for s in ["", "hello", "héllo wörld", "🦀 rust"] {
            let ciphertext = crypter.encrypt(s).unwrap();
            let plaintext = crypter.decrypt(&ciphertext).unwrap();
            assert_eq!(plaintext, s);
        }
    }

    #[test]
    fn encrypting_the_same_plaintext_twice_differs() {
        let crypter = AesGcmCrypter::new(&test_key());
        let a = crypter.encrypt("same").unwrap();
        let b = crypter.encrypt("same").unwrap();
        assert_ne!(a, b, "random nonce should make ciphertexts differ");
    }

    #[test]
    fn from_slice_rejects_wrong_length_keys() {
        assert!(AesGcmCrypter::from_slice(b"too-short").is_err());
        assert!(AesGcmCrypter::from_slice(&[0u8; KEY_LEN]).is_ok());
    }

    #[test]
    fn decrypt_rejects_truncated_ciphertext() {
        let crypter = AesGcmCrypter::new(&test_key());
        assert!(crypter.decrypt("ab").is_err());
    }
}
