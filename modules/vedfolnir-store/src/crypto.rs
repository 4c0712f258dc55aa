use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use uuid::Uuid;

use vedfolnir_common::VedfolnirError;

const NONCE_LEN: usize = 12;

/// Encrypts/decrypts PlatformConnection credential fields with AES-256-GCM.
/// The owning `platform_connection_id` is bound in as associated data so a
/// ciphertext copied onto a different row fails to decrypt, preventing
/// row-swap attacks.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// `key_material` must decode to exactly 32 bytes (e.g. a base64 or hex
    /// encoded key loaded from `Config::credential_encryption_key`).
    pub fn new(key_bytes: &[u8]) -> Result<Self, VedfolnirError> {
        if key_bytes.len() != 32 {
            return Err(VedfolnirError::Configuration(format!(
                "CREDENTIAL_ENCRYPTION_KEY must decode to 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str, connection_id: Uuid) -> Result<Vec<u8>, VedfolnirError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = connection_id.as_bytes();
        let payload = aes_gcm::aead::Payload {
            msg: plaintext.as_bytes(),
            aad,
        };
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload)
            .map_err(|e| VedfolnirError::Configuration(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, stored: &[u8], connection_id: Uuid) -> Result<String, VedfolnirError> {
        if stored.len() < NONCE_LEN {
            return Err(VedfolnirError::Configuration(
                "ciphertext shorter than nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = stored.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let aad = connection_id.as_bytes();
        let payload = aes_gcm::aead::Payload {
            msg: ciphertext,
            aad,
        };
        let plaintext = self
            .cipher
            .decrypt(nonce, payload)
            .map_err(|e| VedfolnirError::Configuration(format!("decryption failed: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| VedfolnirError::Configuration(format!("decrypted payload not utf8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> CredentialCipher {
        CredentialCipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn round_trips_plaintext() {
        let cipher = test_cipher();
        let connection_id = Uuid::new_v4();
        let ciphertext = cipher.encrypt("super-secret-token", connection_id).unwrap();
        assert_ne!(ciphertext, b"super-secret-token".to_vec());
        let plaintext = cipher.decrypt(&ciphertext, connection_id).unwrap();
        assert_eq!(plaintext, "super-secret-token");
    }

    #[test]
    fn rejects_row_swapped_ciphertext() {
        let cipher = test_cipher();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ciphertext = cipher.encrypt("token-for-a", a).unwrap();
        assert!(cipher.decrypt(&ciphertext, b).is_err());
    }

    #[test]
    fn rejects_short_key() {
        assert!(CredentialCipher::new(&[1u8; 16]).is_err());
    }
}
