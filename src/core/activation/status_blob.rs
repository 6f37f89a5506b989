// src/core/activation/status_blob.rs
//! Encrypted activation-status blob delivered to the device. The 23-byte
//! plaintext layout is part of the wire contract:
//!
//! ```text
//! byte 0       status code (1..=5)
//! byte 1       current version
//! byte 2       upgrade version
//! byte 3       failed attempts
//! byte 4       max failed attempts
//! byte 5       counter look-ahead
//! byte 6       counter low byte
//! bytes 7..23  ctr_data hash, or filler when no hash applies
//! ```

use sha2::{Digest, Sha256};

use crate::core::crypto::cipher::{
    aes_cbc_decrypt, aes_cbc_encrypt, hmac_sha256, random_bytes,
};
use crate::core::crypto::kdf::kdf_x963;
use crate::utils::error::{Result, ServiceError};

pub const STATUS_BLOB_LENGTH: usize = 23;
pub const UPGRADE_VERSION: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBlob {
    pub status: u8,
    pub current_version: u8,
    pub upgrade_version: u8,
    pub failed_attempts: u8,
    pub max_failed_attempts: u8,
    pub ctr_lookahead: u8,
    pub ctr_info: u8,
    pub ctr_data_hash: [u8; 16],
}

impl StatusBlob {
    pub fn encode(&self) -> [u8; STATUS_BLOB_LENGTH] {
        let mut bytes = [0u8; STATUS_BLOB_LENGTH];
        bytes[0] = self.status;
        bytes[1] = self.current_version;
        bytes[2] = self.upgrade_version;
        bytes[3] = self.failed_attempts;
        bytes[4] = self.max_failed_attempts;
        bytes[5] = self.ctr_lookahead;
        bytes[6] = self.ctr_info;
        bytes[7..].copy_from_slice(&self.ctr_data_hash);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != STATUS_BLOB_LENGTH {
            return Err(ServiceError::InvalidInputFormat);
        }
        let mut ctr_data_hash = [0u8; 16];
        ctr_data_hash.copy_from_slice(&bytes[7..]);
        Ok(Self {
            status: bytes[0],
            current_version: bytes[1],
            upgrade_version: bytes[2],
            failed_attempts: bytes[3],
            max_failed_attempts: bytes[4],
            ctr_lookahead: bytes[5],
            ctr_info: bytes[6],
            ctr_data_hash,
        })
    }
}

/// `HMAC-SHA256(transport_key, ctr_data)` truncated to 16 bytes; lets the
/// device cross-check its local counter without learning the server copy.
pub fn ctr_data_hash(transport_key: &[u8], ctr_data: &[u8]) -> [u8; 16] {
    let digest = hmac_sha256(transport_key, ctr_data);
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&digest[..16]);
    hash
}

/// Encrypts the blob under the transport key. With a challenge present a
/// random 16-byte nonce is generated and the IV is derived from
/// `challenge || nonce`; without one the legacy zero IV applies.
pub fn encrypt_status_blob(
    blob: &StatusBlob,
    transport_key: &[u8],
    challenge: Option<&[u8]>,
) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
    let plaintext = blob.encode();
    match challenge {
        Some(challenge) => {
            let nonce = random_bytes(16);
            let iv = status_iv(challenge, &nonce);
            let encrypted = aes_cbc_encrypt(transport_key, &iv, &plaintext)?;
            Ok((encrypted, Some(nonce)))
        }
        None => {
            let encrypted = aes_cbc_encrypt(transport_key, &[0u8; 16], &plaintext)?;
            Ok((encrypted, None))
        }
    }
}

pub fn decrypt_status_blob(
    encrypted: &[u8],
    transport_key: &[u8],
    challenge: Option<&[u8]>,
    nonce: Option<&[u8]>,
) -> Result<StatusBlob> {
    let iv = match (challenge, nonce) {
        (Some(challenge), Some(nonce)) => status_iv(challenge, nonce),
        _ => vec![0u8; 16],
    };
    let plaintext = aes_cbc_decrypt(transport_key, &iv, encrypted)?;
    StatusBlob::decode(&plaintext)
}

fn status_iv(challenge: &[u8], nonce: &[u8]) -> Vec<u8> {
    let mut input = challenge.to_vec();
    input.extend_from_slice(nonce);
    kdf_x963(&input, b"", 16).to_vec()
}

/// v3 device public key fingerprint: 8 decimal digits derived from
/// `SHA-256(device_pub || server_pub || activation_id)`.
pub fn device_fingerprint_v3(
    device_public_key: &[u8],
    server_public_key: &[u8],
    activation_id: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_public_key);
    hasher.update(server_public_key);
    hasher.update(activation_id.as_bytes());
    fingerprint_digits(&hasher.finalize())
}

/// v2 fingerprint over the device public key alone.
pub fn device_fingerprint_v2(device_public_key: &[u8]) -> String {
    fingerprint_digits(&Sha256::digest(device_public_key))
}

fn fingerprint_digits(digest: &[u8]) -> String {
    let tail = &digest[digest.len() - 4..];
    let value = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]) & 0x7FFF_FFFF;
    format!("{:08}", value % 100_000_000)
}
