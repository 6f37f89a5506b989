// src/api/types.rs
//! Wire DTOs of the RPC surface. All byte parameters are base64 strings;
//! cryptograms carry the compressed ephemeral point, MAC, ciphertext and
//! optional nonce exactly as specified by protocol v3.0/v3.1.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::crypto::EciesCryptogram;
use crate::utils::error::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EciesCryptogramDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_public_key: Option<String>,
    pub mac: String,
    pub encrypted_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl EciesCryptogramDto {
    pub fn decode(&self) -> Result<EciesCryptogram, ServiceError> {
        let decode = |value: &str| {
            STANDARD
                .decode(value)
                .map_err(|_| ServiceError::InvalidInputFormat)
        };
        Ok(EciesCryptogram {
            ephemeral_public_key: self
                .ephemeral_public_key
                .as_deref()
                .map(decode)
                .transpose()?,
            mac: decode(&self.mac)?,
            encrypted_data: decode(&self.encrypted_data)?,
            nonce: self.nonce.as_deref().map(decode).transpose()?,
        })
    }

    pub fn encode(cryptogram: &EciesCryptogram) -> Self {
        Self {
            ephemeral_public_key: cryptogram
                .ephemeral_public_key
                .as_deref()
                .map(|b| STANDARD.encode(b)),
            mac: STANDARD.encode(&cryptogram.mac),
            encrypted_data: STANDARD.encode(&cryptogram.encrypted_data),
            nonce: cryptogram.nonce.as_deref().map(|b| STANDARD.encode(b)),
        }
    }
}

pub fn decode_base64(value: &str) -> Result<Vec<u8>, ServiceError> {
    STANDARD
        .decode(value)
        .map_err(|_| ServiceError::InvalidInputFormat)
}

// -- activation -------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitActivationDto {
    pub application_id: String,
    pub user_id: String,
    #[serde(default)]
    pub max_failure_count: Option<u64>,
    #[serde(default)]
    pub timestamp_activation_expire: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareActivationDto {
    pub activation_code: String,
    pub application_key: String,
    #[serde(flatten)]
    pub cryptogram: EciesCryptogramDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivationDto {
    pub user_id: String,
    pub application_key: String,
    #[serde(default)]
    pub max_failure_count: Option<u64>,
    #[serde(default)]
    pub timestamp_activation_expire: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub cryptogram: EciesCryptogramDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationIdDto {
    pub activation_id: String,
    #[serde(default)]
    pub external_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockActivationDto {
    pub activation_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub external_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationStatusDto {
    pub activation_id: String,
    #[serde(default)]
    pub challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationListDto {
    pub user_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupActivationsDto {
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub application_ids: Option<Vec<String>>,
    #[serde(default)]
    pub activation_statuses: Option<Vec<String>>,
    #[serde(default)]
    pub timestamp_last_used_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp_last_used_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusBulkDto {
    pub activation_ids: Vec<String>,
    pub activation_status: String,
    #[serde(default)]
    pub external_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationHistoryDto {
    pub activation_id: String,
    pub timestamp_from: DateTime<Utc>,
    pub timestamp_to: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryActivationDto {
    pub recovery_code: String,
    pub puk: String,
    pub application_key: String,
    #[serde(default)]
    pub max_failure_count: Option<u64>,
    #[serde(flatten)]
    pub cryptogram: EciesCryptogramDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUpgradeDto {
    pub activation_id: String,
    pub application_key: String,
    #[serde(flatten)]
    pub cryptogram: EciesCryptogramDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitUpgradeDto {
    pub activation_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEciesDecryptorDto {
    pub application_key: String,
    #[serde(default)]
    pub activation_id: Option<String>,
    pub ephemeral_public_key: String,
}

// -- tokens -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenDto {
    pub activation_id: String,
    pub application_key: String,
    pub signature_type: String,
    #[serde(flatten)]
    pub cryptogram: EciesCryptogramDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenDto {
    pub token_id: String,
    pub nonce: String,
    pub timestamp: i64,
    pub token_digest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTokenDto {
    pub token_id: String,
    pub activation_id: String,
}

// -- signatures -------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignatureDto {
    pub activation_id: String,
    pub application_key: String,
    pub signature_type: String,
    /// Base64 of the normalized request data computed by the caller.
    pub data: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedOfflinePayloadDto {
    pub activation_id: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonPersonalizedOfflinePayloadDto {
    pub application_id: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOfflineSignatureDto {
    pub activation_id: String,
    pub data: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEcdsaSignatureDto {
    pub activation_id: String,
    pub data: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnlockDto {
    pub activation_id: String,
    pub application_key: String,
    pub signature_type: String,
    pub data: String,
    pub signature: String,
    #[serde(flatten)]
    pub cryptogram: EciesCryptogramDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureAuditDto {
    pub user_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    pub timestamp_from: DateTime<Utc>,
    pub timestamp_to: DateTime<Utc>,
}

// -- applications -----------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationDto {
    pub application_name: String,
    #[serde(default)]
    pub application_roles: Vec<String>,
    #[serde(default = "default_true")]
    pub activation_recovery_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationIdDto {
    pub application_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationVersionDto {
    pub application_id: String,
    pub application_version_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationVersionIdDto {
    pub application_id: String,
    pub application_version_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallbackUrlDto {
    pub application_id: String,
    pub name: String,
    pub callback_url: String,
    #[serde(default)]
    pub attributes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveCallbackUrlDto {
    pub application_id: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntegrationDto {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveIntegrationDto {
    pub id: String,
}
