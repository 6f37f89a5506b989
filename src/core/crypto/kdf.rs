// src/core/crypto/kdf.rs

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

// Derivation labels for keys obtained from the activation master shared
// secret. The labels are part of the protocol and must not change.
pub const LABEL_TRANSPORT: &[u8] = b"/pa/key/transport";
pub const LABEL_VAULT: &[u8] = b"/pa/key/vault";
pub const LABEL_SIGNATURE_POSSESSION: &[u8] = b"/pa/signature/possession";
pub const LABEL_SIGNATURE_KNOWLEDGE: &[u8] = b"/pa/signature/knowledge";
pub const LABEL_SIGNATURE_BIOMETRY: &[u8] = b"/pa/signature/biometry";

/// ANSI X9.63 key derivation with SHA-256.
///
/// `T(i) = SHA-256(secret || I2OSP(i, 4) || shared_info)` for a counter
/// starting at 1, concatenated and truncated to `length` bytes.
pub fn kdf_x963(secret: &[u8], shared_info: &[u8], length: usize) -> Zeroizing<Vec<u8>> {
    let mut output = Zeroizing::new(Vec::with_capacity(length));
    let mut counter: u32 = 1;

    while output.len() < length {
        let mut hasher = Sha256::new();
        hasher.update(secret);
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_info);
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }

    output.truncate(length);
    output
}

/// Transport key for an activation, derived from the master ECDH secret.
/// Valid for the lifetime of the device key pair.
pub fn derive_transport_key(master_shared_secret: &[u8]) -> Zeroizing<Vec<u8>> {
    kdf_x963(master_shared_secret, LABEL_TRANSPORT, 16)
}

/// Vault encryption key, released to the device only after a successful
/// signature verification.
pub fn derive_vault_key(master_shared_secret: &[u8]) -> Zeroizing<Vec<u8>> {
    kdf_x963(master_shared_secret, LABEL_VAULT, 16)
}

pub fn derive_signature_key(master_shared_secret: &[u8], label: &[u8]) -> Zeroizing<Vec<u8>> {
    kdf_x963(master_shared_secret, label, 16)
}
