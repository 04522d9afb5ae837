use aes_gcm::aead::{Aead, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::{Engine as _, engine::general_purpose};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption key must be exactly 32 bytes")]
    InvalidKey,
    #[error("Base64 decode failed: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("Invalid encrypted data length")]
    Truncated,
    #[error("Cipher operation failed")]
    Cipher,
    #[error("UTF-8 conversion failed: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Turns a stored secret back into plaintext.
#[cfg_attr(test, mockall::automock)]
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String, EncryptionError>;
}

/// AES-256-GCM with the random nonce prepended, base64 encoded.
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    pub fn from_key(key: &str) -> Result<Self, EncryptionError> {
        if key.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EncryptionError::Cipher)?;

        let mut encrypted = nonce_bytes.to_vec();
        encrypted.extend_from_slice(&ciphertext);

        Ok(general_purpose::STANDARD.encode(&encrypted))
    }
}

impl SecretDecryptor for EncryptionService {
    fn decrypt(&self, ciphertext: &str) -> Result<String, EncryptionError> {
        let encrypted = general_purpose::STANDARD.decode(ciphertext)?;

        if encrypted.len() < NONCE_LEN {
            return Err(EncryptionError::Truncated);
        }

        let (nonce_bytes, data) = encrypted.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), data)
            .map_err(|_| EncryptionError::Cipher)?;

        Ok(String::from_utf8(plaintext)?)
    }
}
