// src/core/activation/mod.rs
//! Activation lifecycle: creation, pairing, commitment, blocking and
//! removal of device-to-user bindings, plus the encrypted status blob and
//! the mediator ECIES export.
//!
//! Every state transition happens under the per-activation row lock and
//! persists its history record in the same storage batch. Expired
//! CREATED/OTP_USED activations are removed lazily by whichever read
//! touches them first.

pub mod status_blob;
pub mod types;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use p256::SecretKey;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

use crate::core::callback::CallbackNotifier;
use crate::core::crypto::{
    codes, ecies, kdf, keys, Ecies, EciesCryptogram, EnvelopeKey, HashBasedCounter, KeyVault,
};
use crate::core::model::{
    Activation, ActivationHistoryRecord, ActivationStatus, Application, ApplicationVersion,
};
use crate::core::recovery::RecoveryService;
use crate::storage::Repositories;
use crate::utils::config::ActivationConfig;
use crate::utils::error::{Result, ServiceError};

use status_blob::{
    ctr_data_hash, device_fingerprint_v2, device_fingerprint_v3, encrypt_status_blob, StatusBlob,
    UPGRADE_VERSION,
};
use types::*;

pub struct ActivationService {
    repositories: Arc<Repositories>,
    vault: Arc<KeyVault>,
    recovery: Arc<RecoveryService>,
    notifier: Arc<CallbackNotifier>,
    config: ActivationConfig,
}

/// Master ECDH secret of an activation, shared between the stored server
/// private key and the device public key. Token and signature
/// verification derive their keys from it.
pub(crate) fn master_shared_secret(
    activation: &Activation,
    vault: &KeyVault,
) -> Result<Zeroizing<Vec<u8>>> {
    let device_public_key = activation
        .device_public_key
        .as_deref()
        .ok_or(ServiceError::ActivationIncorrectState)?;
    let device_public_key = keys::import_public_key(device_public_key)?;
    let server_private_key = unseal_server_private_key(activation, vault)?;
    Ok(keys::shared_secret(&server_private_key, &device_public_key))
}

pub(crate) fn unseal_server_private_key(
    activation: &Activation,
    vault: &KeyVault,
) -> Result<SecretKey> {
    let sealed = vault.open(
        &activation.server_private_key,
        &[activation.user_id.as_str(), activation.activation_id.as_str()],
    )?;
    keys::import_private_key(&sealed)
}

impl ActivationService {
    pub fn new(
        repositories: Arc<Repositories>,
        vault: Arc<KeyVault>,
        recovery: Arc<RecoveryService>,
        notifier: Arc<CallbackNotifier>,
        config: ActivationConfig,
    ) -> Self {
        Self {
            repositories,
            vault,
            recovery,
            notifier,
            config,
        }
    }

    // -- init ---------------------------------------------------------------

    pub async fn init(&self, request: InitActivationRequest) -> Result<InitActivationResponse> {
        if request.application_id.is_empty() {
            return Err(ServiceError::NoApplicationId);
        }
        if request.user_id.is_empty() {
            return Err(ServiceError::NoUserId);
        }
        if request.user_id.len() > 255 {
            return Err(ServiceError::InvalidInputFormat);
        }

        let application = self
            .repositories
            .find_application(&request.application_id)?
            .ok_or(ServiceError::InvalidApplication)?;
        let master = self
            .repositories
            .find_latest_master_key_pair(&application.id)?
            .ok_or(ServiceError::NoMasterServerKeypair)?;
        let master_private = keys::import_private_key(&master.master_private_key)
            .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;

        let activation_id = self.generate_unique_activation_id()?;
        let activation_code = self.generate_unique_activation_code(&application.id)?;
        let activation_signature = keys::sign_data(&master_private, activation_code.as_bytes());

        let server_key_pair = keys::generate_key_pair();
        let server_private_exported = keys::export_private_key(&server_key_pair.private_key);
        let sealed_private = self.vault.seal(
            &server_private_exported,
            &[request.user_id.as_str(), activation_id.as_str()],
        )?;

        let now = Utc::now();
        let activation = Activation {
            activation_id: activation_id.clone(),
            application_id: application.id.clone(),
            user_id: request.user_id.clone(),
            activation_name: None,
            activation_code: Some(activation_code.clone()),
            status: ActivationStatus::Created,
            blocked_reason: None,
            counter: 0,
            ctr_data: None,
            device_public_key: None,
            server_private_key: sealed_private,
            server_public_key: keys::export_public_key(&server_key_pair.public_key),
            failed_attempts: 0,
            max_failed_attempts: request
                .max_failure_count
                .unwrap_or(self.config.default_max_failed_attempts),
            expires_at: request
                .expire_at
                .unwrap_or(now + chrono::Duration::seconds(self.config.validity_period_secs)),
            created_at: now,
            last_used_at: None,
            last_changed_at: None,
            master_keypair_id: master.id.clone(),
            version: None,
            extras: None,
            flags: vec![],
        };

        let history = ActivationHistoryRecord::for_activation(&activation, None, None, now);
        self.repositories
            .save_activation_with_history(&activation, &history)?;
        self.notifier.notify_activation_change(&activation);

        info!(
            "Initialized activation {} for user {}",
            activation_id, request.user_id
        );
        Ok(InitActivationResponse {
            activation_id,
            activation_code,
            activation_signature,
            user_id: request.user_id,
            application_id: application.id,
        })
    }

    // -- prepare / create ---------------------------------------------------

    pub async fn prepare(
        &self,
        activation_code: &str,
        application_key: &str,
        cryptogram: &EciesCryptogram,
    ) -> Result<PreparedActivation> {
        if !codes::validate_code(activation_code) {
            return Err(ServiceError::InvalidInputFormat);
        }
        let (application, version) = self.resolve_application_version(application_key)?;

        // Locate by secondary index first, then re-acquire by id under
        // the row lock before any write.
        let candidate = self
            .repositories
            .find_activation_by_code(&application.id, activation_code)?
            .ok_or(ServiceError::ActivationNotFound)?;

        let _guard = self
            .repositories
            .lock_activation(&candidate.activation_id)
            .await;
        let mut activation = self
            .repositories
            .find_activation(&candidate.activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;

        if self.expire_in_place(&mut activation)? {
            return Err(ServiceError::ActivationExpired);
        }
        if activation.status != ActivationStatus::Created
            || activation.application_id != application.id
        {
            return Err(ServiceError::ActivationIncorrectState);
        }

        let cryptogram = self
            .process_layer2(&mut activation, &application, &version, cryptogram)
            .await?;
        Ok(PreparedActivation {
            activation_id: activation.activation_id,
            user_id: activation.user_id,
            application_id: activation.application_id,
            cryptogram,
        })
    }

    pub async fn create(
        &self,
        user_id: &str,
        application_key: &str,
        max_failure_count: Option<u64>,
        expire_at: Option<chrono::DateTime<Utc>>,
        cryptogram: &EciesCryptogram,
    ) -> Result<PreparedActivation> {
        let (application, version) = self.resolve_application_version(application_key)?;

        let initialized = self
            .init(InitActivationRequest {
                application_id: application.id.clone(),
                user_id: user_id.to_string(),
                max_failure_count,
                expire_at,
            })
            .await?;

        let _guard = self
            .repositories
            .lock_activation(&initialized.activation_id)
            .await;
        let mut activation = self
            .repositories
            .find_activation(&initialized.activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;

        let cryptogram = self
            .process_layer2(&mut activation, &application, &version, cryptogram)
            .await?;
        Ok(PreparedActivation {
            activation_id: activation.activation_id,
            user_id: activation.user_id,
            application_id: activation.application_id,
            cryptogram,
        })
    }

    /// Decrypts the layer-2 payload, stores the device key, moves the
    /// activation to OTP_USED and returns the encrypted layer-2 response.
    /// The caller holds the row lock.
    async fn process_layer2(
        &self,
        activation: &mut Activation,
        application: &Application,
        version: &ApplicationVersion,
        cryptogram: &EciesCryptogram,
    ) -> Result<EciesCryptogram> {
        let master = self
            .repositories
            .find_master_key_pair(&activation.application_id, &activation.master_keypair_id)?
            .ok_or(ServiceError::NoMasterServerKeypair)?;
        let master_private = keys::import_private_key(&master.master_private_key)
            .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;

        let ephemeral = cryptogram
            .ephemeral_public_key
            .as_deref()
            .ok_or(ServiceError::DecryptionFailed)?;
        let ephemeral = keys::import_public_key(ephemeral)
            .map_err(|_| ServiceError::DecryptionFailed)?;

        let ecies_session = Ecies::for_request(
            &master_private,
            &ephemeral,
            ecies::INFO1_ACTIVATION_LAYER2,
            ecies::shared_info2_application(&version.application_secret),
        );
        let plaintext = ecies_session.decrypt_request(cryptogram)?;

        // From here on a malformed payload sinks the activation: the
        // one-time code is burnt and pairing cannot complete.
        let layer2: Layer2Request = match serde_json::from_slice(&plaintext) {
            Ok(layer2) => layer2,
            Err(_) => {
                self.sink_unpairable(activation).await?;
                return Err(ServiceError::ActivationNotFound);
            }
        };
        let device_public_key = match STANDARD
            .decode(&layer2.device_public_key)
            .ok()
            .and_then(|bytes| keys::import_public_key(&bytes).ok())
        {
            Some(key) => key,
            None => {
                self.sink_unpairable(activation).await?;
                return Err(ServiceError::ActivationNotFound);
            }
        };

        activation.device_public_key = Some(keys::export_public_key(&device_public_key));
        activation.activation_name = layer2.activation_name;
        activation.extras = layer2.extras;
        activation.ctr_data = Some(HashBasedCounter::init());
        activation.version = Some(3);
        activation.status = ActivationStatus::OtpUsed;
        activation.last_changed_at = Some(Utc::now());

        let activation_recovery = if application.activation_recovery_enabled {
            let issued = self.recovery.issue_for_activation(
                &activation.application_id,
                &activation.user_id,
                &activation.activation_id,
            )?;
            Some(ActivationRecoveryPayload {
                recovery_code: issued.recovery_code,
                puk: issued.puk,
            })
        } else {
            None
        };

        let history =
            ActivationHistoryRecord::for_activation(activation, None, None, Utc::now());
        self.repositories
            .save_activation_with_history(activation, &history)?;
        self.notifier.notify_activation_change(activation);

        let response = Layer2Response {
            activation_id: activation.activation_id.clone(),
            server_public_key: STANDARD.encode(&activation.server_public_key),
            ctr_data: STANDARD.encode(activation.ctr_data.as_deref().unwrap_or_default()),
            activation_recovery,
        };
        let response_bytes = serde_json::to_vec(&response)
            .map_err(|e| ServiceError::Unknown(e.to_string()))?;
        ecies_session.encrypt_response(&response_bytes)
    }

    /// Sinks an activation whose pairing can no longer complete.
    async fn sink_unpairable(&self, activation: &mut Activation) -> Result<()> {
        activation.status = ActivationStatus::Removed;
        activation.last_changed_at = Some(Utc::now());
        let history = ActivationHistoryRecord::for_activation(
            activation,
            Some("INVALID_DEVICE_KEY".to_string()),
            None,
            Utc::now(),
        );
        self.repositories
            .save_activation_with_history(activation, &history)?;
        self.recovery
            .revoke_for_activation(&activation.activation_id)?;
        self.notifier.notify_activation_change(activation);
        Ok(())
    }

    // -- commit / block / unblock / remove ----------------------------------

    pub async fn commit(
        &self,
        activation_id: &str,
        external_user_id: Option<&str>,
    ) -> Result<bool> {
        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;

        if self.expire_in_place(&mut activation)? {
            return Err(ServiceError::ActivationExpired);
        }
        match activation.status {
            ActivationStatus::Removed => return Err(ServiceError::ActivationExpired),
            ActivationStatus::OtpUsed => {}
            _ => return Err(ServiceError::ActivationIncorrectState),
        }

        self.transition(
            &mut activation,
            ActivationStatus::Active,
            None,
            external_user_id,
        )?;
        self.recovery.activate_for_activation(activation_id)?;
        info!("Committed activation {}", activation_id);
        Ok(true)
    }

    pub async fn block(
        &self,
        activation_id: &str,
        reason: Option<&str>,
        external_user_id: Option<&str>,
    ) -> Result<ActivationStatus> {
        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        self.expire_in_place(&mut activation)?;

        match activation.status {
            // Blocking a blocked activation is a no-op, not an error.
            ActivationStatus::Blocked => Ok(ActivationStatus::Blocked),
            ActivationStatus::Active => {
                activation.blocked_reason =
                    Some(reason.unwrap_or("NOT_SPECIFIED").to_string());
                self.transition(
                    &mut activation,
                    ActivationStatus::Blocked,
                    None,
                    external_user_id,
                )?;
                Ok(ActivationStatus::Blocked)
            }
            _ => Err(ServiceError::ActivationIncorrectState),
        }
    }

    pub async fn unblock(
        &self,
        activation_id: &str,
        external_user_id: Option<&str>,
    ) -> Result<ActivationStatus> {
        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        self.expire_in_place(&mut activation)?;

        match activation.status {
            // Unblocking an active activation is a no-op, not an error.
            ActivationStatus::Active => Ok(ActivationStatus::Active),
            ActivationStatus::Blocked => {
                activation.blocked_reason = None;
                activation.failed_attempts = 0;
                self.transition(
                    &mut activation,
                    ActivationStatus::Active,
                    None,
                    external_user_id,
                )?;
                Ok(ActivationStatus::Active)
            }
            _ => Err(ServiceError::ActivationIncorrectState),
        }
    }

    pub async fn remove(
        &self,
        activation_id: &str,
        external_user_id: Option<&str>,
    ) -> Result<bool> {
        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;

        if activation.status != ActivationStatus::Removed {
            self.transition(
                &mut activation,
                ActivationStatus::Removed,
                None,
                external_user_id,
            )?;
            self.recovery.revoke_for_activation(activation_id)?;
            info!("Removed activation {}", activation_id);
        }
        Ok(true)
    }

    // -- status -------------------------------------------------------------

    pub async fn get_status(
        &self,
        activation_id: &str,
        challenge: Option<&[u8]>,
    ) -> Result<ActivationStatusResponse> {
        let activation = match self.load_with_lazy_expiry(activation_id).await? {
            Some(activation) => activation,
            // Absent activations answer with a synthetic REMOVED blob so
            // callers cannot probe which identifiers exist.
            None => {
                return Ok(ActivationStatusResponse {
                    activation_id: activation_id.to_string(),
                    status: ActivationStatus::Removed,
                    blocked_reason: None,
                    activation_name: None,
                    user_id: None,
                    application_id: None,
                    extras: None,
                    version: None,
                    created_at: None,
                    last_used_at: None,
                    last_changed_at: None,
                    encrypted_status_blob: crate::core::crypto::cipher::random_bytes(32),
                    status_blob_nonce: challenge
                        .map(|_| crate::core::crypto::cipher::random_bytes(16)),
                    activation_code: None,
                    activation_signature: None,
                    device_public_key_fingerprint: None,
                });
            }
        };

        let (encrypted_status_blob, status_blob_nonce, activation_code, activation_signature) =
            match (&activation.status, &activation.device_public_key) {
                (ActivationStatus::Created, _) => {
                    // Pairing not finished: hand back the code and its
                    // master signature so the device can complete it.
                    let code = activation
                        .activation_code
                        .clone()
                        .ok_or(ServiceError::GenericCryptographyError)?;
                    let master = self
                        .repositories
                        .find_master_key_pair(
                            &activation.application_id,
                            &activation.master_keypair_id,
                        )?
                        .ok_or(ServiceError::NoMasterServerKeypair)?;
                    let master_private = keys::import_private_key(&master.master_private_key)
                        .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;
                    let signature = keys::sign_data(&master_private, code.as_bytes());
                    (
                        crate::core::crypto::cipher::random_bytes(32),
                        challenge.map(|_| crate::core::crypto::cipher::random_bytes(16)),
                        Some(code),
                        Some(signature),
                    )
                }
                (_, Some(_)) => {
                    let shared = master_shared_secret(&activation, &self.vault)?;
                    let transport_key = kdf::derive_transport_key(&shared);

                    let hash = match (&activation.version, &activation.ctr_data) {
                        (Some(3), Some(ctr_data)) => ctr_data_hash(&transport_key, ctr_data),
                        _ => [0u8; 16],
                    };
                    let blob = StatusBlob {
                        status: activation.status.byte_code(),
                        current_version: activation.version.unwrap_or(0) as u8,
                        upgrade_version: UPGRADE_VERSION,
                        failed_attempts: activation.failed_attempts.min(255) as u8,
                        max_failed_attempts: activation.max_failed_attempts.min(255) as u8,
                        ctr_lookahead: self.config.signature_validation_lookahead.min(255) as u8,
                        ctr_info: (activation.counter & 0xFF) as u8,
                        ctr_data_hash: hash,
                    };
                    let (encrypted, nonce) =
                        encrypt_status_blob(&blob, &transport_key, challenge)?;
                    (encrypted, nonce, None, None)
                }
                // Removed before pairing: nothing meaningful to encrypt.
                (_, None) => (
                    crate::core::crypto::cipher::random_bytes(32),
                    challenge.map(|_| crate::core::crypto::cipher::random_bytes(16)),
                    None,
                    None,
                ),
            };

        let device_public_key_fingerprint = match (&activation.device_public_key, activation.version)
        {
            (Some(device), Some(3)) => Some(device_fingerprint_v3(
                device,
                &activation.server_public_key,
                &activation.activation_id,
            )),
            (Some(device), Some(2)) => Some(device_fingerprint_v2(device)),
            _ => None,
        };

        Ok(ActivationStatusResponse {
            activation_id: activation.activation_id.clone(),
            status: activation.status,
            blocked_reason: activation.blocked_reason.clone(),
            activation_name: activation.activation_name.clone(),
            user_id: Some(activation.user_id.clone()),
            application_id: Some(activation.application_id.clone()),
            extras: activation.extras.clone(),
            version: activation.version,
            created_at: Some(activation.created_at),
            last_used_at: activation.last_used_at,
            last_changed_at: activation.last_changed_at,
            encrypted_status_blob,
            status_blob_nonce,
            activation_code,
            activation_signature,
            device_public_key_fingerprint,
        })
    }

    // -- list / lookup / bulk -----------------------------------------------

    pub async fn get_list(
        &self,
        user_id: &str,
        application_id: Option<&str>,
    ) -> Result<Vec<ActivationSummary>> {
        let activations = self
            .repositories
            .list_activations_by_user(user_id, application_id)?;
        let mut summaries = Vec::with_capacity(activations.len());
        for activation in activations {
            // Re-load applying lazy expiry so the answer reflects it.
            if let Some(activation) =
                self.load_with_lazy_expiry(&activation.activation_id).await?
            {
                summaries.push(summarize(&activation));
            }
        }
        Ok(summaries)
    }

    pub async fn lookup(&self, criteria: &LookupCriteria) -> Result<Vec<ActivationSummary>> {
        let mut summaries = Vec::new();
        for user_id in &criteria.user_ids {
            for activation in self.repositories.list_activations_by_user(user_id, None)? {
                let activation = match self
                    .load_with_lazy_expiry(&activation.activation_id)
                    .await?
                {
                    Some(activation) => activation,
                    None => continue,
                };
                if let Some(apps) = &criteria.application_ids {
                    if !apps.contains(&activation.application_id) {
                        continue;
                    }
                }
                if let Some(statuses) = &criteria.statuses {
                    if !statuses.contains(&activation.status) {
                        continue;
                    }
                }
                if let Some(before) = criteria.last_used_before {
                    if activation.last_used_at.map_or(true, |used| used >= before) {
                        continue;
                    }
                }
                if let Some(after) = criteria.last_used_after {
                    if activation.last_used_at.map_or(true, |used| used <= after) {
                        continue;
                    }
                }
                summaries.push(summarize(&activation));
            }
        }
        Ok(summaries)
    }

    /// Administrative bulk status change; only BLOCKED and REMOVED are
    /// valid targets and REMOVED rows are never resurrected.
    pub async fn update_status_bulk(
        &self,
        activation_ids: &[String],
        status: ActivationStatus,
        external_user_id: Option<&str>,
    ) -> Result<()> {
        if !matches!(status, ActivationStatus::Blocked | ActivationStatus::Removed) {
            return Err(ServiceError::InvalidRequest);
        }
        for activation_id in activation_ids {
            let _guard = self.repositories.lock_activation(activation_id).await;
            let mut activation = match self.repositories.find_activation(activation_id)? {
                Some(activation) => activation,
                None => continue,
            };
            if activation.status == ActivationStatus::Removed || activation.status == status {
                continue;
            }
            if status == ActivationStatus::Blocked {
                // Only ACTIVE rows can be blocked; a pending activation
                // has no device key to block.
                if activation.status != ActivationStatus::Active {
                    continue;
                }
                activation.blocked_reason = Some("NOT_SPECIFIED".to_string());
            }
            self.transition(&mut activation, status, None, external_user_id)?;
            if status == ActivationStatus::Removed {
                self.recovery.revoke_for_activation(activation_id)?;
            }
        }
        Ok(())
    }

    pub fn get_history(
        &self,
        activation_id: &str,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
    ) -> Result<Vec<ActivationHistoryRecord>> {
        self.repositories.list_history(activation_id, from, to)
    }

    // -- recovery activation ------------------------------------------------

    /// Creates a replacement activation authorized by a recovery code and
    /// PUK. The activation bound to the code is removed, the new one is
    /// committed immediately and carries fresh recovery material.
    pub async fn create_via_recovery(
        &self,
        recovery_code: &str,
        puk: &str,
        application_key: &str,
        max_failure_count: Option<u64>,
        cryptogram: &EciesCryptogram,
    ) -> Result<PreparedActivation> {
        let (application, version) = self.resolve_application_version(application_key)?;

        let code = self
            .recovery
            .verify_puk(&application.id, recovery_code, puk)?;

        if let Some(previous) = &code.activation_id {
            match self.remove(previous, None).await {
                Ok(_) | Err(ServiceError::ActivationNotFound) => {}
                Err(e) => return Err(e),
            }
        }

        let initialized = self
            .init(InitActivationRequest {
                application_id: application.id.clone(),
                user_id: code.user_id.clone(),
                max_failure_count,
                expire_at: None,
            })
            .await?;

        let _guard = self
            .repositories
            .lock_activation(&initialized.activation_id)
            .await;
        let mut activation = self
            .repositories
            .find_activation(&initialized.activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        let response = self
            .process_layer2(&mut activation, &application, &version, cryptogram)
            .await?;

        // Recovery-created activations skip the explicit commit step.
        self.transition(&mut activation, ActivationStatus::Active, None, None)?;
        self.recovery
            .activate_for_activation(&activation.activation_id)?;

        info!(
            "Created activation {} via recovery for user {}",
            activation.activation_id, activation.user_id
        );
        Ok(PreparedActivation {
            activation_id: activation.activation_id,
            user_id: activation.user_id,
            application_id: activation.application_id,
            cryptogram: response,
        })
    }

    // -- protocol upgrade ---------------------------------------------------

    /// Starts the v2 to v3 upgrade: derives fresh hash-based counter data
    /// and returns it inside an activation-scoped envelope.
    pub async fn start_upgrade(
        &self,
        activation_id: &str,
        application_key: &str,
        cryptogram: &EciesCryptogram,
    ) -> Result<EciesCryptogram> {
        let (_, version) = self.resolve_application_version(application_key)?;

        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.status != ActivationStatus::Active {
            return Err(ServiceError::ActivationIncorrectState);
        }

        let shared = master_shared_secret(&activation, &self.vault)?;
        let transport_key = kdf::derive_transport_key(&shared);
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
            ecies::INFO1_ACTIVATION,
            ecies::shared_info2_activation(&version.application_secret, Some(&transport_key)),
        );
        session.decrypt_request(cryptogram)?;

        if activation.ctr_data.is_none() {
            activation.ctr_data = Some(HashBasedCounter::init());
            activation.last_changed_at = Some(Utc::now());
            self.repositories.save_activation(&activation)?;
        }

        let payload = serde_json::json!({
            "ctrData": STANDARD.encode(activation.ctr_data.as_deref().unwrap_or_default()),
        });
        session.encrypt_response(payload.to_string().as_bytes())
    }

    /// Finishes the upgrade by pinning the activation to protocol v3.
    pub async fn commit_upgrade(&self, activation_id: &str) -> Result<bool> {
        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.status != ActivationStatus::Active || activation.ctr_data.is_none() {
            return Err(ServiceError::ActivationIncorrectState);
        }

        activation.version = Some(3);
        activation.last_changed_at = Some(Utc::now());
        self.repositories.save_activation(&activation)?;
        Ok(true)
    }

    // -- mediator export ----------------------------------------------------

    /// Hands the envelope key and MAC suffix for one request to a
    /// mediating server. Application scope derives from the master key
    /// pair, activation scope from the activation's server key.
    pub fn get_ecies_decryptor(
        &self,
        application_key: &str,
        activation_id: Option<&str>,
        ephemeral_public_key: &[u8],
    ) -> Result<EciesDecryptorParameters> {
        let (application, version) = self.resolve_application_version(application_key)?;
        let ephemeral = keys::import_public_key(ephemeral_public_key)?;

        match activation_id {
            None => {
                let master = self
                    .repositories
                    .find_latest_master_key_pair(&application.id)?
                    .ok_or(ServiceError::NoMasterServerKeypair)?;
                let master_private = keys::import_private_key(&master.master_private_key)
                    .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;
                let envelope =
                    EnvelopeKey::derive(&master_private, &ephemeral, ecies::INFO1_APPLICATION);
                Ok(EciesDecryptorParameters {
                    secret_key: envelope.as_bytes().to_vec(),
                    shared_info2: ecies::shared_info2_application(&version.application_secret),
                })
            }
            Some(activation_id) => {
                let activation = self
                    .repositories
                    .find_activation(activation_id)?
                    .ok_or(ServiceError::ActivationNotFound)?;
                if !matches!(
                    activation.status,
                    ActivationStatus::OtpUsed | ActivationStatus::Active
                ) {
                    return Err(ServiceError::ActivationIncorrectState);
                }
                let shared = master_shared_secret(&activation, &self.vault)?;
                let transport_key = kdf::derive_transport_key(&shared);
                let server_private = unseal_server_private_key(&activation, &self.vault)?;
                let envelope =
                    EnvelopeKey::derive(&server_private, &ephemeral, ecies::INFO1_ACTIVATION);
                Ok(EciesDecryptorParameters {
                    secret_key: envelope.as_bytes().to_vec(),
                    shared_info2: ecies::shared_info2_activation(
                        &version.application_secret,
                        Some(&transport_key),
                    ),
                })
            }
        }
    }

    // -- shared helpers -----------------------------------------------------

    pub(crate) fn resolve_application_version(
        &self,
        application_key: &str,
    ) -> Result<(Application, ApplicationVersion)> {
        let version = self
            .repositories
            .find_application_version_by_key(application_key)?
            .filter(|v| v.supported)
            .ok_or(ServiceError::InvalidApplication)?;
        let application = self
            .repositories
            .find_application(&version.application_id)?
            .ok_or(ServiceError::InvalidApplication)?;
        Ok((application, version))
    }

    /// Lock-free read with the expiry rule applied: a pending activation
    /// past its deadline is re-read under the lock, removed and only then
    /// returned.
    pub(crate) async fn load_with_lazy_expiry(
        &self,
        activation_id: &str,
    ) -> Result<Option<Activation>> {
        let activation = match self.repositories.find_activation(activation_id)? {
            Some(activation) => activation,
            None => return Ok(None),
        };
        if !activation.is_expired(Utc::now()) {
            return Ok(Some(activation));
        }

        let _guard = self.repositories.lock_activation(activation_id).await;
        let mut activation = match self.repositories.find_activation(activation_id)? {
            Some(activation) => activation,
            None => return Ok(None),
        };
        self.expire_in_place(&mut activation)?;
        Ok(Some(activation))
    }

    /// Removes an expired pending activation. The caller holds the lock.
    fn expire_in_place(&self, activation: &mut Activation) -> Result<bool> {
        if !activation.is_expired(Utc::now()) {
            return Ok(false);
        }
        self.transition(
            activation,
            ActivationStatus::Removed,
            Some("EXPIRED".to_string()),
            None,
        )?;
        self.recovery
            .revoke_for_activation(&activation.activation_id)?;
        info!("Expired activation {}", activation.activation_id);
        Ok(true)
    }

    /// Persists a state transition with its history record in one batch,
    /// then enqueues the callback notification.
    fn transition(
        &self,
        activation: &mut Activation,
        status: ActivationStatus,
        event_reason: Option<String>,
        external_user_id: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        activation.status = status;
        activation.last_changed_at = Some(now);

        let history = ActivationHistoryRecord::for_activation(
            activation,
            event_reason,
            external_user_id.map(String::from),
            now,
        );
        self.repositories
            .save_activation_with_history(activation, &history)?;
        self.notifier.notify_activation_change(activation);
        Ok(())
    }

    fn generate_unique_activation_id(&self) -> Result<String> {
        for _ in 0..self.config.id_generation_iterations {
            let id = codes::generate_activation_id();
            if self.repositories.find_activation(&id)?.is_none() {
                return Ok(id);
            }
        }
        Err(ServiceError::UnableToGenerateActivationId)
    }

    fn generate_unique_activation_code(&self, application_id: &str) -> Result<String> {
        for _ in 0..self.config.code_generation_iterations {
            let code = codes::generate_code();
            if self
                .repositories
                .find_activation_by_code(application_id, &code)?
                .is_none()
            {
                return Ok(code);
            }
        }
        Err(ServiceError::UnableToGenerateActivationCode)
    }
}

fn summarize(activation: &Activation) -> ActivationSummary {
    ActivationSummary {
        activation_id: activation.activation_id.clone(),
        activation_name: activation.activation_name.clone(),
        status: activation.status,
        blocked_reason: activation.blocked_reason.clone(),
        user_id: activation.user_id.clone(),
        application_id: activation.application_id.clone(),
        created_at: activation.created_at,
        last_used_at: activation.last_used_at,
        version: activation.version,
    }
}
