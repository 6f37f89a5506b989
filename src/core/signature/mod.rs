// src/core/signature/mod.rs
//! Verification of device-computed authentication signatures. Factor keys
//! derive from the activation's master ECDH secret; the signature itself
//! is a dash-joined sequence of 8-digit decimal components, one per
//! factor, computed over the request data and a hash-based counter value.
//! The server searches a bounded look-ahead window of counter positions
//! and advances to the matched one.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::core::activation::{master_shared_secret, unseal_server_private_key};
use crate::core::callback::CallbackNotifier;
use crate::core::crypto::cipher::{aes_cbc_encrypt, constant_time_eq, hmac_sha256, random_bytes};
use crate::core::crypto::{ecies, kdf, keys, Ecies, EciesCryptogram, HashBasedCounter, KeyVault};
use crate::core::model::{
    Activation, ActivationHistoryRecord, ActivationStatus, SignatureAuditRecord, SignatureFactor,
    SignatureType, BLOCKED_REASON_MAX_FAILED_ATTEMPTS,
};
use crate::storage::Repositories;
use crate::utils::config::ActivationConfig;
use crate::utils::error::{Result, ServiceError};

#[derive(Debug, Clone)]
pub struct SignatureVerifyResponse {
    pub valid: bool,
    pub activation_id: String,
    pub user_id: String,
    pub application_id: String,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub remaining_attempts: u64,
    pub signature_type: SignatureType,
}

#[derive(Debug, Clone)]
pub struct OfflineSignaturePayload {
    /// `data '\n' nonce_b64 '\n' signing_signature_b64`, rendered into
    /// the offline QR payload by the caller.
    pub offline_data: String,
    pub nonce: Vec<u8>,
}

/// Factor keys for a signature type, derived from the master ECDH secret
/// in factor order.
pub fn derive_factor_keys(
    master_shared_secret: &[u8],
    signature_type: SignatureType,
) -> Vec<Zeroizing<Vec<u8>>> {
    signature_type
        .factors()
        .iter()
        .map(|factor| {
            let label = match factor {
                SignatureFactor::Possession => kdf::LABEL_SIGNATURE_POSSESSION,
                SignatureFactor::Knowledge => kdf::LABEL_SIGNATURE_KNOWLEDGE,
                SignatureFactor::Biometry => kdf::LABEL_SIGNATURE_BIOMETRY,
            };
            kdf::derive_signature_key(master_shared_secret, label)
        })
        .collect()
}

/// Computes the signature string for one counter value: per factor,
/// `HMAC-SHA256(key, data || ctr)` reduced to 8 decimal digits, joined
/// with dashes.
pub fn compute_signature(
    factor_keys: &[Zeroizing<Vec<u8>>],
    data: &[u8],
    ctr_data: &[u8],
) -> String {
    let mut input = data.to_vec();
    input.extend_from_slice(ctr_data);

    factor_keys
        .iter()
        .map(|key| {
            let digest = hmac_sha256(key, &input);
            let tail = &digest[digest.len() - 4..];
            let value =
                u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]) & 0x7FFF_FFFF;
            format!("{:08}", value % 100_000_000)
        })
        .collect::<Vec<_>>()
        .join("-")
}

pub struct SignatureService {
    repositories: Arc<Repositories>,
    vault: Arc<KeyVault>,
    notifier: Arc<CallbackNotifier>,
    config: ActivationConfig,
}

impl SignatureService {
    pub fn new(
        repositories: Arc<Repositories>,
        vault: Arc<KeyVault>,
        notifier: Arc<CallbackNotifier>,
        config: ActivationConfig,
    ) -> Self {
        Self {
            repositories,
            vault,
            notifier,
            config,
        }
    }

    /// Online signature verification; owns the failed-attempt counter of
    /// the activation and blocks it at the threshold.
    pub async fn verify_signature(
        &self,
        activation_id: &str,
        application_key: &str,
        signature_type: SignatureType,
        data: &[u8],
        signature: &str,
    ) -> Result<SignatureVerifyResponse> {
        let version = self
            .repositories
            .find_application_version_by_key(application_key)?
            .filter(|v| v.supported)
            .ok_or(ServiceError::InvalidApplication)?;

        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.application_id != version.application_id {
            return Err(ServiceError::InvalidApplication);
        }

        self.verify_locked(&mut activation, &[signature_type], data, signature)
            .await
    }

    /// Offline signature verification: the device may have signed with
    /// possession alone or possession+knowledge; both are tried against
    /// one shared failure accounting.
    pub async fn verify_offline_signature(
        &self,
        activation_id: &str,
        data: &[u8],
        signature: &str,
    ) -> Result<SignatureVerifyResponse> {
        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;

        self.verify_locked(
            &mut activation,
            &[
                SignatureType::Possession,
                SignatureType::PossessionKnowledge,
            ],
            data,
            signature,
        )
        .await
    }

    /// Core verification under the activation lock. Exactly one
    /// success/failure is accounted no matter how many signature types
    /// are admissible.
    async fn verify_locked(
        &self,
        activation: &mut Activation,
        admissible_types: &[SignatureType],
        data: &[u8],
        signature: &str,
    ) -> Result<SignatureVerifyResponse> {
        if activation.status != ActivationStatus::Active {
            self.audit(activation, admissible_types[0], data, signature, false, "activation is not active")?;
            return Ok(self.response(activation, false, admissible_types[0]));
        }
        let ctr_data = activation
            .ctr_data
            .clone()
            .ok_or(ServiceError::ActivationIncorrectState)?;

        let shared = master_shared_secret(activation, &self.vault)?;
        let candidates = HashBasedCounter::lookahead(
            &ctr_data,
            self.config.signature_validation_lookahead,
        );

        let mut matched: Option<(usize, Vec<u8>, SignatureType)> = None;
        'outer: for signature_type in admissible_types {
            let factor_keys = derive_factor_keys(&shared, *signature_type);
            for (offset, candidate) in candidates.iter().enumerate() {
                let expected = compute_signature(&factor_keys, data, candidate);
                if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
                    matched = Some((offset, candidate.clone(), *signature_type));
                    break 'outer;
                }
            }
        }

        match matched {
            Some((offset, ctr, signature_type)) => {
                activation.ctr_data = Some(ctr);
                activation.counter += offset as u64 + 1;
                activation.failed_attempts = 0;
                activation.last_used_at = Some(Utc::now());
                self.repositories.save_activation(activation)?;
                self.audit(activation, signature_type, data, signature, true, "signature verified")?;
                Ok(self.response(activation, true, signature_type))
            }
            None => {
                activation.failed_attempts += 1;
                if activation.failed_attempts >= activation.max_failed_attempts {
                    activation.status = ActivationStatus::Blocked;
                    activation.blocked_reason =
                        Some(BLOCKED_REASON_MAX_FAILED_ATTEMPTS.to_string());
                    activation.last_changed_at = Some(Utc::now());
                    let history = ActivationHistoryRecord::for_activation(
                        activation,
                        Some(BLOCKED_REASON_MAX_FAILED_ATTEMPTS.to_string()),
                        None,
                        Utc::now(),
                    );
                    self.repositories
                        .save_activation_with_history(activation, &history)?;
                    self.notifier.notify_activation_change(activation);
                    info!(
                        "Activation {} blocked after {} failed signature attempts",
                        activation.activation_id, activation.failed_attempts
                    );
                } else {
                    self.repositories.save_activation(activation)?;
                }
                self.audit(activation, admissible_types[0], data, signature, false, "signature mismatch")?;
                Ok(self.response(activation, false, admissible_types[0]))
            }
        }
    }

    /// Plain ECDSA verification of device-signed data.
    pub fn verify_ecdsa_signature(
        &self,
        activation_id: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        let device_public_key = activation
            .device_public_key
            .as_deref()
            .ok_or(ServiceError::ActivationIncorrectState)?;
        let device_public_key = keys::import_public_key(device_public_key)?;
        Ok(keys::verify_signature(&device_public_key, data, signature))
    }

    // -- offline payloads ---------------------------------------------------

    /// Offline payload signed by the activation's server key.
    pub fn create_personalized_offline_payload(
        &self,
        activation_id: &str,
        data: &str,
    ) -> Result<OfflineSignaturePayload> {
        let activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.status != ActivationStatus::Active {
            return Err(ServiceError::ActivationIncorrectState);
        }
        let signing_key = unseal_server_private_key(&activation, &self.vault)?;
        Ok(build_offline_payload(data, &signing_key))
    }

    /// Offline payload signed by the application's master key.
    pub fn create_non_personalized_offline_payload(
        &self,
        application_id: &str,
        data: &str,
    ) -> Result<OfflineSignaturePayload> {
        let master = self
            .repositories
            .find_latest_master_key_pair(application_id)?
            .ok_or(ServiceError::NoMasterServerKeypair)?;
        let signing_key = keys::import_private_key(&master.master_private_key)
            .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;
        Ok(build_offline_payload(data, &signing_key))
    }

    // -- vault unlock -------------------------------------------------------

    /// Releases the vault encryption key after a successful signature
    /// verification. The key travels AES-wrapped under the transport key,
    /// inside a vault-unlock scoped ECIES envelope.
    pub async fn vault_unlock(
        &self,
        activation_id: &str,
        application_key: &str,
        signature_type: SignatureType,
        data: &[u8],
        signature: &str,
        cryptogram: &EciesCryptogram,
    ) -> Result<EciesCryptogram> {
        let verification = self
            .verify_signature(activation_id, application_key, signature_type, data, signature)
            .await?;
        if !verification.valid {
            return Err(ServiceError::InvalidRequest);
        }

        let version = self
            .repositories
            .find_application_version_by_key(application_key)?
            .ok_or(ServiceError::InvalidApplication)?;
        let activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;

        let shared = master_shared_secret(&activation, &self.vault)?;
        let transport_key = kdf::derive_transport_key(&shared);
        let vault_key = kdf::derive_vault_key(&shared);
        let server_private = unseal_server_private_key(&activation, &self.vault)?;

        let ephemeral = cryptogram
            .ephemeral_public_key
            .as_deref()
            .ok_or(ServiceError::DecryptionFailed)?;
        let ephemeral =
            keys::import_public_key(ephemeral).map_err(|_| ServiceError::DecryptionFailed)?;

        let session = Ecies::for_request(
            &server_private,
            &ephemeral,
            ecies::INFO1_VAULT_UNLOCK,
            ecies::shared_info2_activation(&version.application_secret, Some(&transport_key)),
        );
        session.decrypt_request(cryptogram)?;

        let wrapped_vault_key = aes_cbc_encrypt(&transport_key, &[0u8; 16], &vault_key)?;
        let payload = serde_json::json!({
            "activationId": activation.activation_id,
            "encryptedVaultEncryptionKey": STANDARD.encode(wrapped_vault_key),
        });
        session.encrypt_response(payload.to_string().as_bytes())
    }

    // -- audit --------------------------------------------------------------

    pub fn get_signature_audit_log(
        &self,
        user_id: &str,
        application_id: Option<&str>,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
    ) -> Result<Vec<SignatureAuditRecord>> {
        self.repositories.list_audit(user_id, application_id, from, to)
    }

    fn audit(
        &self,
        activation: &Activation,
        signature_type: SignatureType,
        data: &[u8],
        signature: &str,
        valid: bool,
        note: &str,
    ) -> Result<()> {
        self.repositories.append_audit(&SignatureAuditRecord {
            id: Uuid::new_v4().to_string(),
            activation_id: activation.activation_id.clone(),
            application_id: activation.application_id.clone(),
            user_id: activation.user_id.clone(),
            signature_type,
            signature_version: activation.version.map(|v| format!("{}", v)),
            counter: activation.counter,
            ctr_data: activation.ctr_data.clone(),
            data: data.to_vec(),
            signature: signature.to_string(),
            valid,
            note: note.to_string(),
            created_at: Utc::now(),
        })
    }

    fn response(
        &self,
        activation: &Activation,
        valid: bool,
        signature_type: SignatureType,
    ) -> SignatureVerifyResponse {
        SignatureVerifyResponse {
            valid,
            activation_id: activation.activation_id.clone(),
            user_id: activation.user_id.clone(),
            application_id: activation.application_id.clone(),
            activation_status: activation.status,
            blocked_reason: activation.blocked_reason.clone(),
            remaining_attempts: activation
                .max_failed_attempts
                .saturating_sub(activation.failed_attempts),
            signature_type,
        }
    }
}

fn build_offline_payload(data: &str, signing_key: &p256::SecretKey) -> OfflineSignaturePayload {
    let nonce = random_bytes(16);
    let mut signed_data = data.as_bytes().to_vec();
    signed_data.extend_from_slice(&nonce);
    let signature = keys::sign_data(signing_key, &signed_data);

    let offline_data = format!(
        "{}\n{}\n{}",
        data,
        STANDARD.encode(&nonce),
        STANDARD.encode(signature)
    );
    OfflineSignaturePayload { offline_data, nonce }
}
