// src/core/crypto/ecies.rs
//! Scope-parameterized ECIES: ephemeral ECDH on P-256, X9.63 key
//! derivation, AES-128-CBC encrypt-then-MAC with HMAC-SHA256. One
//! envelope key serves one request/response pair. Both halves of the
//! scheme live here; the server uses the decrypt-request half, tests and
//! the mediator export exercise the encrypt-request half.

use p256::{PublicKey, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::cipher::{aes_cbc_decrypt, aes_cbc_encrypt, constant_time_eq, hmac_sha256};
use super::kdf::kdf_x963;
use super::keys;
use crate::utils::error::{Result, ServiceError};

// sharedInfo1 scope selectors. Part of the wire contract.
pub const INFO1_APPLICATION: &[u8] = b"/pa/generic/application";
pub const INFO1_ACTIVATION: &[u8] = b"/pa/generic/activation";
pub const INFO1_ACTIVATION_LAYER2: &[u8] = b"/pa/activation";
pub const INFO1_TOKEN_CREATE: &[u8] = b"/pa/token/create";
pub const INFO1_VAULT_UNLOCK: &[u8] = b"/pa/vault/unlock";

const ENVELOPE_KEY_LENGTH: usize = 48;

/// Wire form of an ECIES message. Requests carry the ephemeral public key
/// (33-byte compressed point) and, for protocol V3.1, a 16-byte nonce;
/// responses carry neither.
#[derive(Debug, Clone)]
pub struct EciesCryptogram {
    pub ephemeral_public_key: Option<Vec<u8>>,
    pub mac: Vec<u8>,
    pub encrypted_data: Vec<u8>,
    pub nonce: Option<Vec<u8>>,
}

/// Envelope key derived from the ephemeral ECDH result:
/// `KDF-X9.63(Z, sharedInfo1, 48)` split into `k_enc | k_mac | iv_base`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey {
    bytes: Vec<u8>,
}

impl EnvelopeKey {
    pub fn derive(
        static_private: &SecretKey,
        ephemeral_public: &PublicKey,
        shared_info1: &[u8],
    ) -> Self {
        let z = keys::shared_secret(static_private, ephemeral_public);
        let bytes = kdf_x963(&z, shared_info1, ENVELOPE_KEY_LENGTH);
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENVELOPE_KEY_LENGTH {
            return Err(ServiceError::InvalidKeyFormat);
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn enc_key(&self) -> &[u8] {
        &self.bytes[0..16]
    }

    fn mac_key(&self) -> &[u8] {
        &self.bytes[16..32]
    }

    fn iv_base(&self) -> &[u8] {
        &self.bytes[32..48]
    }

    /// Request IV: the raw `iv_base` for V3.0 cryptograms (no nonce), or
    /// `KDF-X9.63(iv_base || nonce, "", 16)` for V3.1.
    fn derive_iv(&self, nonce: Option<&[u8]>) -> Zeroizing<Vec<u8>> {
        match nonce {
            None => Zeroizing::new(self.iv_base().to_vec()),
            Some(nonce) => {
                let mut input = Zeroizing::new(self.iv_base().to_vec());
                input.extend_from_slice(nonce);
                kdf_x963(&input, b"", 16)
            }
        }
    }
}

/// One ECIES session bound to a derived envelope key and a `sharedInfo2`
/// MAC suffix. Decrypting a request and encrypting its response reuse the
/// same envelope key.
pub struct Ecies {
    envelope_key: EnvelopeKey,
    shared_info2: Vec<u8>,
}

impl Ecies {
    pub fn for_request(
        static_private: &SecretKey,
        ephemeral_public: &PublicKey,
        shared_info1: &[u8],
        shared_info2: Vec<u8>,
    ) -> Self {
        Self {
            envelope_key: EnvelopeKey::derive(static_private, ephemeral_public, shared_info1),
            shared_info2,
        }
    }

    /// Builds a session around a pre-derived envelope key; used by the
    /// mediator decryptor export.
    pub fn with_envelope_key(envelope_key: EnvelopeKey, shared_info2: Vec<u8>) -> Self {
        Self {
            envelope_key,
            shared_info2,
        }
    }

    pub fn envelope_key(&self) -> &EnvelopeKey {
        &self.envelope_key
    }

    pub fn shared_info2(&self) -> &[u8] {
        &self.shared_info2
    }

    pub fn decrypt_request(&self, cryptogram: &EciesCryptogram) -> Result<Vec<u8>> {
        let mut mac_input = cryptogram.encrypted_data.clone();
        mac_input.extend_from_slice(&self.shared_info2);
        let expected_mac = hmac_sha256(self.envelope_key.mac_key(), &mac_input);

        if !constant_time_eq(&expected_mac, &cryptogram.mac) {
            return Err(ServiceError::DecryptionFailed);
        }

        let iv = self.envelope_key.derive_iv(cryptogram.nonce.as_deref());
        aes_cbc_decrypt(self.envelope_key.enc_key(), &iv, &cryptogram.encrypted_data)
            .map_err(|_| ServiceError::DecryptionFailed)
    }

    /// Encrypts the response under the request's envelope key. Responses
    /// use the base IV and carry no ephemeral key or nonce.
    pub fn encrypt_response(&self, plaintext: &[u8]) -> Result<EciesCryptogram> {
        let iv = self.envelope_key.derive_iv(None);
        let encrypted_data = aes_cbc_encrypt(self.envelope_key.enc_key(), &iv, plaintext)
            .map_err(|_| ServiceError::GenericCryptographyError)?;

        let mut mac_input = encrypted_data.clone();
        mac_input.extend_from_slice(&self.shared_info2);
        let mac = hmac_sha256(self.envelope_key.mac_key(), &mac_input);

        Ok(EciesCryptogram {
            ephemeral_public_key: None,
            mac,
            encrypted_data,
            nonce: None,
        })
    }
}

/// Client half: generates an ephemeral key pair and builds a request
/// cryptogram against the recipient's static public key. Returns the
/// session so the caller can decrypt the matching response.
pub fn encrypt_request(
    static_public: &PublicKey,
    shared_info1: &[u8],
    shared_info2: Vec<u8>,
    plaintext: &[u8],
    nonce: Option<Vec<u8>>,
) -> Result<(EciesCryptogram, Ecies)> {
    let ephemeral = keys::generate_key_pair();
    let z = keys::shared_secret(&ephemeral.private_key, static_public);
    let envelope_key = EnvelopeKey {
        bytes: kdf_x963(&z, shared_info1, ENVELOPE_KEY_LENGTH).to_vec(),
    };

    let iv = envelope_key.derive_iv(nonce.as_deref());
    let encrypted_data = aes_cbc_encrypt(envelope_key.enc_key(), &iv, plaintext)
        .map_err(|_| ServiceError::GenericCryptographyError)?;

    let mut mac_input = encrypted_data.clone();
    mac_input.extend_from_slice(&shared_info2);
    let mac = hmac_sha256(envelope_key.mac_key(), &mac_input);

    let cryptogram = EciesCryptogram {
        ephemeral_public_key: Some(keys::export_public_key(&ephemeral.public_key)),
        mac,
        encrypted_data,
        nonce,
    };
    let session = Ecies::with_envelope_key(envelope_key, shared_info2);
    Ok((cryptogram, session))
}

/// `sharedInfo2` for application-scope envelopes:
/// `HMAC-SHA256(app_secret, app_secret)`.
pub fn shared_info2_application(application_secret: &str) -> Vec<u8> {
    hmac_sha256(application_secret.as_bytes(), application_secret.as_bytes())
}

/// `sharedInfo2` for activation-scope envelopes:
/// `HMAC-SHA256(app_secret, transport_key)`, with a zero block when no
/// transport key exists yet.
pub fn shared_info2_activation(application_secret: &str, transport_key: Option<&[u8]>) -> Vec<u8> {
    let zero = [0u8; 16];
    let data = transport_key.unwrap_or(&zero);
    hmac_sha256(application_secret.as_bytes(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::cipher::random_bytes;

    fn roundtrip(plaintext: &[u8], nonce: Option<Vec<u8>>) {
        let server = keys::generate_key_pair();
        let shared_info2 = shared_info2_application("app-secret");

        let (cryptogram, _client) = encrypt_request(
            &server.public_key,
            INFO1_APPLICATION,
            shared_info2.clone(),
            plaintext,
            nonce,
        )
        .unwrap();

        let ephemeral = keys::import_public_key(
            cryptogram.ephemeral_public_key.as_deref().unwrap(),
        )
        .unwrap();
        let ecies = Ecies::for_request(
            &server.private_key,
            &ephemeral,
            INFO1_APPLICATION,
            shared_info2,
        );

        assert_eq!(ecies.decrypt_request(&cryptogram).unwrap(), plaintext);
    }

    #[test]
    fn test_request_roundtrip_v30() {
        roundtrip(b"{\"device\":\"payload\"}", None);
    }

    #[test]
    fn test_request_roundtrip_v31_nonce() {
        roundtrip(b"{\"device\":\"payload\"}", Some(random_bytes(16)));
    }

    #[test]
    fn test_response_roundtrip() {
        let server = keys::generate_key_pair();
        let shared_info2 = shared_info2_application("app-secret");

        let (cryptogram, client) = encrypt_request(
            &server.public_key,
            INFO1_APPLICATION,
            shared_info2.clone(),
            b"request",
            Some(random_bytes(16)),
        )
        .unwrap();

        let ephemeral =
            keys::import_public_key(cryptogram.ephemeral_public_key.as_deref().unwrap()).unwrap();
        let server_session = Ecies::for_request(
            &server.private_key,
            &ephemeral,
            INFO1_APPLICATION,
            shared_info2,
        );
        server_session.decrypt_request(&cryptogram).unwrap();

        let response = server_session.encrypt_response(b"response payload").unwrap();
        assert!(response.ephemeral_public_key.is_none());
        assert!(response.nonce.is_none());

        // The client decrypts the response with the same envelope key.
        assert_eq!(
            client.decrypt_request(&response).unwrap(),
            b"response payload"
        );
    }

    #[test]
    fn test_tampered_mac_fails() {
        let server = keys::generate_key_pair();
        let shared_info2 = shared_info2_application("app-secret");
        let (mut cryptogram, _) = encrypt_request(
            &server.public_key,
            INFO1_APPLICATION,
            shared_info2.clone(),
            b"payload",
            None,
        )
        .unwrap();
        cryptogram.mac[0] ^= 0x01;

        let ephemeral =
            keys::import_public_key(cryptogram.ephemeral_public_key.as_deref().unwrap()).unwrap();
        let ecies = Ecies::for_request(
            &server.private_key,
            &ephemeral,
            INFO1_APPLICATION,
            shared_info2,
        );
        assert!(matches!(
            ecies.decrypt_request(&cryptogram),
            Err(ServiceError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let server = keys::generate_key_pair();
        let shared_info2 = shared_info2_application("app-secret");
        let (mut cryptogram, _) = encrypt_request(
            &server.public_key,
            INFO1_APPLICATION,
            shared_info2.clone(),
            b"payload",
            None,
        )
        .unwrap();
        cryptogram.encrypted_data[0] ^= 0x01;

        let ephemeral =
            keys::import_public_key(cryptogram.ephemeral_public_key.as_deref().unwrap()).unwrap();
        let ecies = Ecies::for_request(
            &server.private_key,
            &ephemeral,
            INFO1_APPLICATION,
            shared_info2,
        );
        assert!(matches!(
            ecies.decrypt_request(&cryptogram),
            Err(ServiceError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_shared_info2_fails() {
        let server = keys::generate_key_pair();
        let (cryptogram, _) = encrypt_request(
            &server.public_key,
            INFO1_APPLICATION,
            shared_info2_application("app-secret"),
            b"payload",
            None,
        )
        .unwrap();

        let ephemeral =
            keys::import_public_key(cryptogram.ephemeral_public_key.as_deref().unwrap()).unwrap();
        let ecies = Ecies::for_request(
            &server.private_key,
            &ephemeral,
            INFO1_APPLICATION,
            shared_info2_application("other-secret"),
        );
        assert!(ecies.decrypt_request(&cryptogram).is_err());
    }

    #[test]
    fn test_scope_separation() {
        // Same keys, different sharedInfo1: envelope keys must differ.
        let server = keys::generate_key_pair();
        let ephemeral = keys::generate_key_pair();

        let app = EnvelopeKey::derive(&server.private_key, &ephemeral.public_key, INFO1_APPLICATION);
        let act = EnvelopeKey::derive(&server.private_key, &ephemeral.public_key, INFO1_ACTIVATION);
        assert_ne!(app.as_bytes(), act.as_bytes());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// decrypt(encrypt(p)) == p for any payload, with or
            /// without a nonce.
            #[test]
            fn prop_roundtrip(
                payload in proptest::collection::vec(any::<u8>(), 0..256),
                use_nonce in any::<bool>(),
            ) {
                let server = keys::generate_key_pair();
                let shared_info2 = shared_info2_application("app-secret");
                let nonce = use_nonce.then(|| random_bytes(16));

                let (cryptogram, _) = encrypt_request(
                    &server.public_key,
                    INFO1_APPLICATION,
                    shared_info2.clone(),
                    &payload,
                    nonce,
                ).unwrap();

                let ephemeral = keys::import_public_key(
                    cryptogram.ephemeral_public_key.as_deref().unwrap(),
                ).unwrap();
                let ecies = Ecies::for_request(
                    &server.private_key,
                    &ephemeral,
                    INFO1_APPLICATION,
                    shared_info2,
                );
                prop_assert_eq!(ecies.decrypt_request(&cryptogram).unwrap(), payload);
            }

            /// Flipping any bit of the MAC or ciphertext must fail.
            #[test]
            fn prop_tampering_detected(
                payload in proptest::collection::vec(any::<u8>(), 1..64),
                tamper_mac in any::<bool>(),
                index in any::<prop::sample::Index>(),
                bit in 0u8..8,
            ) {
                let server = keys::generate_key_pair();
                let shared_info2 = shared_info2_application("app-secret");

                let (mut cryptogram, _) = encrypt_request(
                    &server.public_key,
                    INFO1_APPLICATION,
                    shared_info2.clone(),
                    &payload,
                    Some(random_bytes(16)),
                ).unwrap();

                if tamper_mac {
                    let i = index.index(cryptogram.mac.len());
                    cryptogram.mac[i] ^= 1 << bit;
                } else {
                    let i = index.index(cryptogram.encrypted_data.len());
                    cryptogram.encrypted_data[i] ^= 1 << bit;
                }

                let ephemeral = keys::import_public_key(
                    cryptogram.ephemeral_public_key.as_deref().unwrap(),
                ).unwrap();
                let ecies = Ecies::for_request(
                    &server.private_key,
                    &ephemeral,
                    INFO1_APPLICATION,
                    shared_info2,
                );
                prop_assert!(matches!(
                    ecies.decrypt_request(&cryptogram),
                    Err(ServiceError::DecryptionFailed)
                ));
            }
        }
    }

    #[test]
    fn test_mediator_decrypt_with_exported_key() {
        // An intermediary holding only the envelope key and sharedInfo2
        // decrypts the same request.
        let server = keys::generate_key_pair();
        let shared_info2 = shared_info2_application("app-secret");
        let (cryptogram, _) = encrypt_request(
            &server.public_key,
            INFO1_APPLICATION,
            shared_info2.clone(),
            b"mediated payload",
            Some(random_bytes(16)),
        )
        .unwrap();

        let ephemeral =
            keys::import_public_key(cryptogram.ephemeral_public_key.as_deref().unwrap()).unwrap();
        let full = Ecies::for_request(
            &server.private_key,
            &ephemeral,
            INFO1_APPLICATION,
            shared_info2.clone(),
        );

        let exported = EnvelopeKey::from_bytes(full.envelope_key().as_bytes()).unwrap();
        let mediator = Ecies::with_envelope_key(exported, shared_info2);
        assert_eq!(
            mediator.decrypt_request(&cryptogram).unwrap(),
            b"mediated payload"
        );
    }
}
