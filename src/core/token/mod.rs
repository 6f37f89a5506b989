// src/core/token/mod.rs
//! Opaque tokens for lightweight authentication. A token is an
//! (identifier, secret) pair vended through an activation-scoped ECIES
//! envelope; verification checks an HMAC digest over nonce and timestamp.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::core::activation::master_shared_secret;
use crate::core::crypto::cipher::{constant_time_eq, hmac_sha256, random_bytes};
use crate::core::crypto::{codes, ecies, kdf, keys, Ecies, EciesCryptogram, KeyVault};
use crate::core::model::{ActivationStatus, SignatureType, Token};
use crate::storage::Repositories;
use crate::utils::config::ActivationConfig;
use crate::utils::error::{Result, ServiceError};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponsePayload {
    token_id: String,
    token_secret: String,
}

#[derive(Debug, Clone)]
pub struct ValidateTokenResponse {
    pub valid: bool,
    pub activation_id: Option<String>,
    pub user_id: Option<String>,
    pub application_id: Option<String>,
    pub signature_type: Option<SignatureType>,
}

impl ValidateTokenResponse {
    fn invalid() -> Self {
        Self {
            valid: false,
            activation_id: None,
            user_id: None,
            application_id: None,
            signature_type: None,
        }
    }
}

pub struct TokenService {
    repositories: Arc<Repositories>,
    vault: Arc<KeyVault>,
    config: ActivationConfig,
}

impl TokenService {
    pub fn new(
        repositories: Arc<Repositories>,
        vault: Arc<KeyVault>,
        config: ActivationConfig,
    ) -> Self {
        Self {
            repositories,
            vault,
            config,
        }
    }

    /// Issues a token for an ACTIVE activation. The request and response
    /// both travel through the token-create ECIES scope bound to the
    /// activation's transport key.
    pub async fn create_token(
        &self,
        activation_id: &str,
        application_key: &str,
        cryptogram: &EciesCryptogram,
        signature_type: SignatureType,
    ) -> Result<EciesCryptogram> {
        let version = self
            .repositories
            .find_application_version_by_key(application_key)?
            .filter(|v| v.supported)
            .ok_or(ServiceError::InvalidApplication)?;

        let activation = self
            .repositories
            .find_activation(activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.status != ActivationStatus::Active {
            return Err(ServiceError::ActivationIncorrectState);
        }
        if activation.application_id != version.application_id {
            return Err(ServiceError::InvalidApplication);
        }

        let shared = master_shared_secret(&activation, &self.vault)?;
        let transport_key = kdf::derive_transport_key(&shared);
        let server_private = crate::core::activation::unseal_server_private_key(
            &activation,
            &self.vault,
        )?;

        let ephemeral = cryptogram
            .ephemeral_public_key
            .as_deref()
            .ok_or(ServiceError::DecryptionFailed)?;
        let ephemeral =
            keys::import_public_key(ephemeral).map_err(|_| ServiceError::DecryptionFailed)?;

        let session = Ecies::for_request(
            &server_private,
            &ephemeral,
            ecies::INFO1_TOKEN_CREATE,
            ecies::shared_info2_activation(&version.application_secret, Some(&transport_key)),
        );
        let payload = session.decrypt_request(cryptogram)?;
        if payload.is_empty() {
            return Err(ServiceError::InvalidRequest);
        }

        let token = Token {
            token_id: self.generate_unique_token_id()?,
            token_secret: random_bytes(16),
            activation_id: activation.activation_id.clone(),
            signature_type_created: signature_type,
            created_at: Utc::now(),
        };
        self.repositories.save_token(&token)?;
        info!(
            "Issued token {} for activation {}",
            token.token_id, activation_id
        );

        let response = TokenResponsePayload {
            token_id: token.token_id,
            token_secret: STANDARD.encode(&token.token_secret),
        };
        let response_bytes =
            serde_json::to_vec(&response).map_err(|e| ServiceError::Unknown(e.to_string()))?;
        session.encrypt_response(&response_bytes)
    }

    /// Checks `digest == HMAC-SHA256(secret, nonce || ascii(timestamp))`.
    /// An unknown token is a negative answer, not an error; freshness of
    /// the timestamp is the caller's concern.
    pub fn validate_token(
        &self,
        token_id: &str,
        nonce: &[u8],
        timestamp: i64,
        digest: &[u8],
    ) -> Result<ValidateTokenResponse> {
        let token = match self.repositories.find_token(token_id)? {
            Some(token) => token,
            None => return Ok(ValidateTokenResponse::invalid()),
        };

        let activation = self
            .repositories
            .find_activation(&token.activation_id)?
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.status != ActivationStatus::Active {
            return Err(ServiceError::ActivationIncorrectState);
        }

        let mut data = nonce.to_vec();
        data.extend_from_slice(timestamp.to_string().as_bytes());
        let expected = hmac_sha256(&token.token_secret, &data);

        if constant_time_eq(&expected, digest) {
            Ok(ValidateTokenResponse {
                valid: true,
                activation_id: Some(activation.activation_id),
                user_id: Some(activation.user_id),
                application_id: Some(activation.application_id),
                signature_type: Some(token.signature_type_created),
            })
        } else {
            Ok(ValidateTokenResponse::invalid())
        }
    }

    /// Deletes the token when it belongs to the given activation.
    /// Idempotent: a missing token counts as removed.
    pub fn remove_token(&self, token_id: &str, activation_id: &str) -> Result<bool> {
        match self.repositories.find_token(token_id)? {
            None => Ok(true),
            Some(token) if token.activation_id == activation_id => {
                self.repositories.delete_token(token_id)?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    fn generate_unique_token_id(&self) -> Result<String> {
        for _ in 0..self.config.token_generation_iterations {
            let token_id = codes::generate_token_id();
            if self.repositories.find_token(&token_id)?.is_none() {
                return Ok(token_id);
            }
        }
        Err(ServiceError::UnableToGenerateToken)
    }
}
