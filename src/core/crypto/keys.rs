// src/core/crypto/keys.rs

use p256::{
    ecdh,
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey, SecretKey,
};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::utils::error::{Result, ServiceError};

/// EC P-256 key pair. Private halves are exported only through
/// zeroizing buffers and sealed before they reach storage.
pub struct EcKeyPair {
    pub private_key: SecretKey,
    pub public_key: PublicKey,
}

pub fn generate_key_pair() -> EcKeyPair {
    let private_key = SecretKey::random(&mut OsRng);
    let public_key = private_key.public_key();
    EcKeyPair {
        private_key,
        public_key,
    }
}

/// SEC1 compressed point, 33 bytes. This is the wire form of all public
/// keys in the protocol.
pub fn export_public_key(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

pub fn import_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| ServiceError::InvalidKeyFormat)
}

pub fn export_private_key(key: &SecretKey) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(key.to_bytes().to_vec())
}

pub fn import_private_key(bytes: &[u8]) -> Result<SecretKey> {
    SecretKey::from_slice(bytes).map_err(|_| ServiceError::InvalidKeyFormat)
}

/// Raw ECDH shared secret (x-coordinate, 32 bytes).
pub fn shared_secret(private_key: &SecretKey, public_key: &PublicKey) -> Zeroizing<Vec<u8>> {
    let shared = ecdh::diffie_hellman(private_key.to_nonzero_scalar(), public_key.as_affine());
    Zeroizing::new(shared.raw_secret_bytes().to_vec())
}

/// ECDSA over SHA-256, DER-encoded signature.
pub fn sign_data(private_key: &SecretKey, data: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::from(private_key);
    let signature: Signature = signing_key.sign(data);
    signature.to_der().as_bytes().to_vec()
}

pub fn verify_signature(public_key: &PublicKey, data: &[u8], signature: &[u8]) -> bool {
    let signature = match Signature::from_der(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    VerifyingKey::from(public_key).verify(data, &signature).is_ok()
}
