// src/storage/encrypted/cipher.rs
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha3::{Digest, Sha3_256};

use super::errors::{Result, StorageError};

/// Domain separation for the row-cipher key, so the configured material
/// can never collide with a key derived for any other purpose.
const KEY_DOMAIN: &[u8] = b"keyfort/storage/row-cipher/v1";

const NONCE_LENGTH: usize = 12;

/// Row-level cipher for everything that reaches RocksDB. Each value is
/// sealed to its row key: the key enters the AEAD as associated data, so
/// a ciphertext copied or moved under another row key fails to open.
/// Sealed values are laid out as `nonce || ciphertext || tag`.
pub struct StorageCipher {
    cipher: Aes256Gcm,
}

impl StorageCipher {
    pub fn new(key_material: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(key_material);
        let cipher_key = hasher.finalize();
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&cipher_key)),
        }
    }

    pub fn encrypt(&self, row_key: &[u8], value: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: value,
                    aad: row_key,
                },
            )
            .map_err(|e| StorageError::EncryptionError(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn decrypt(&self, row_key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LENGTH {
            return Err(StorageError::DecryptionError(
                "Sealed row is too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: row_key,
                },
            )
            .map_err(|e| StorageError::DecryptionError(e.to_string()))
    }
}
