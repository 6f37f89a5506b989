// src/core/crypto/sealing.rs
//! Key-at-rest codec. Server private keys and recovery PUK hashes are
//! sealed under a process-wide master secret before they reach storage.
//! Each record carries the mode it was written in; reads honor the stored
//! mode regardless of the configured write mode.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::cipher::{aes_cbc_decrypt, aes_cbc_encrypt, constant_time_eq, hmac_sha256};
use super::kdf::kdf_x963;
use crate::utils::config::CryptoConfig;
use crate::utils::error::{Result, ServiceError};

const SEALING_KEY_INFO: &[u8] = b"/pa/sealing/key";
const MAC_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    NoEncryption,
    AesHmac,
}

/// A sealed value together with the mode it was sealed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedRecord {
    pub mode: EncryptionMode,
    pub data: Vec<u8>,
}

pub struct KeyVault {
    master_secret: Zeroizing<Vec<u8>>,
    write_mode: EncryptionMode,
}

impl KeyVault {
    pub fn from_config(config: &CryptoConfig) -> Result<Self> {
        let master_secret = STANDARD
            .decode(&config.master_secret)
            .map_err(|_| ServiceError::InvalidCryptoProvider)?;
        let write_mode = match config.key_encryption_mode.as_str() {
            "no_encryption" => EncryptionMode::NoEncryption,
            "aes_hmac" => EncryptionMode::AesHmac,
            _ => return Err(ServiceError::InvalidCryptoProvider),
        };
        if write_mode == EncryptionMode::AesHmac && master_secret.is_empty() {
            return Err(ServiceError::InvalidCryptoProvider);
        }
        Ok(Self {
            master_secret: Zeroizing::new(master_secret),
            write_mode,
        })
    }

    pub fn new(master_secret: Vec<u8>, write_mode: EncryptionMode) -> Self {
        Self {
            master_secret: Zeroizing::new(master_secret),
            write_mode,
        }
    }

    /// Seals `plaintext` bound to `context`. In `AesHmac` mode the IV is
    /// derived from the context tuple and the master secret, and the
    /// ciphertext carries a truncated HMAC over ciphertext and context,
    /// so opening with a different context fails.
    pub fn seal(&self, plaintext: &[u8], context: &[&str]) -> Result<SealedRecord> {
        match self.write_mode {
            EncryptionMode::NoEncryption => Ok(SealedRecord {
                mode: EncryptionMode::NoEncryption,
                data: plaintext.to_vec(),
            }),
            EncryptionMode::AesHmac => {
                let iv = self.derive_iv(context);
                let key = kdf_x963(&self.master_secret, SEALING_KEY_INFO, 16);
                let mut data = aes_cbc_encrypt(&key, &iv, plaintext)?;

                let mut tag = hmac_sha256(&self.master_secret, &self.mac_input(&data, context));
                tag.truncate(MAC_LENGTH);
                data.extend_from_slice(&tag);

                Ok(SealedRecord {
                    mode: EncryptionMode::AesHmac,
                    data,
                })
            }
        }
    }

    pub fn open(&self, record: &SealedRecord, context: &[&str]) -> Result<Zeroizing<Vec<u8>>> {
        match record.mode {
            EncryptionMode::NoEncryption => Ok(Zeroizing::new(record.data.clone())),
            EncryptionMode::AesHmac => {
                if record.data.len() <= MAC_LENGTH {
                    return Err(ServiceError::GenericCryptographyError);
                }
                let (ciphertext, tag) = record.data.split_at(record.data.len() - MAC_LENGTH);

                let mut expected =
                    hmac_sha256(&self.master_secret, &self.mac_input(ciphertext, context));
                expected.truncate(MAC_LENGTH);
                if !constant_time_eq(&expected, tag) {
                    return Err(ServiceError::GenericCryptographyError);
                }

                let iv = self.derive_iv(context);
                let key = kdf_x963(&self.master_secret, SEALING_KEY_INFO, 16);
                let plaintext = aes_cbc_decrypt(&key, &iv, ciphertext)
                    .map_err(|_| ServiceError::GenericCryptographyError)?;
                Ok(Zeroizing::new(plaintext))
            }
        }
    }

    fn derive_iv(&self, context: &[&str]) -> Vec<u8> {
        let mut iv = hmac_sha256(&self.master_secret, context.join("&").as_bytes());
        iv.truncate(16);
        iv
    }

    fn mac_input(&self, ciphertext: &[u8], context: &[&str]) -> Vec<u8> {
        let mut input = ciphertext.to_vec();
        input.extend_from_slice(context.join("&").as_bytes());
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(mode: EncryptionMode) -> KeyVault {
        KeyVault::new(b"master-secret-material".to_vec(), mode)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let vault = vault(EncryptionMode::AesHmac);
        let context = ["alice", "a3f0c1d2"];

        let sealed = vault.seal(b"server private key bytes", &context).unwrap();
        assert_eq!(sealed.mode, EncryptionMode::AesHmac);
        assert_ne!(sealed.data, b"server private key bytes");

        let opened = vault.open(&sealed, &context).unwrap();
        assert_eq!(opened.as_slice(), b"server private key bytes");
    }

    #[test]
    fn test_no_encryption_mode_passthrough() {
        let vault = vault(EncryptionMode::NoEncryption);
        let sealed = vault.seal(b"plain", &["ctx"]).unwrap();
        assert_eq!(sealed.mode, EncryptionMode::NoEncryption);
        assert_eq!(sealed.data, b"plain");
        assert_eq!(vault.open(&sealed, &["ctx"]).unwrap().as_slice(), b"plain");
    }

    #[test]
    fn test_mismatched_context_fails() {
        let vault = vault(EncryptionMode::AesHmac);
        let sealed = vault.seal(b"secret", &["alice", "activation-1"]).unwrap();

        let result = vault.open(&sealed, &["alice", "activation-2"]);
        assert!(matches!(result, Err(ServiceError::GenericCryptographyError)));
    }

    #[test]
    fn test_tampered_record_fails() {
        let vault = vault(EncryptionMode::AesHmac);
        let mut sealed = vault.seal(b"secret", &["ctx"]).unwrap();
        sealed.data[0] ^= 0x01;

        let result = vault.open(&sealed, &["ctx"]);
        assert!(matches!(result, Err(ServiceError::GenericCryptographyError)));
    }

    #[test]
    fn test_reads_honor_stored_mode() {
        // A record written without encryption opens even when the vault
        // is configured to write aes_hmac.
        let plain_vault = vault(EncryptionMode::NoEncryption);
        let sealed = plain_vault.seal(b"legacy", &["ctx"]).unwrap();

        let aes_vault = vault(EncryptionMode::AesHmac);
        assert_eq!(aes_vault.open(&sealed, &["ctx"]).unwrap().as_slice(), b"legacy");
    }

    #[test]
    fn test_from_config_rejects_unknown_mode() {
        let config = CryptoConfig {
            master_secret: STANDARD.encode(b"secret"),
            key_encryption_mode: "rot13".into(),
        };
        assert!(KeyVault::from_config(&config).is_err());
    }
}
