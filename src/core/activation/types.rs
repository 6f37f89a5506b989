// src/core/activation/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::crypto::EciesCryptogram;
use crate::core::model::ActivationStatus;

#[derive(Debug, Clone)]
pub struct InitActivationRequest {
    pub application_id: String,
    pub user_id: String,
    pub max_failure_count: Option<u64>,
    pub expire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct InitActivationResponse {
    pub activation_id: String,
    pub activation_code: String,
    /// ECDSA signature of the activation code by the application's master
    /// private key, proving the code was issued by this server.
    pub activation_signature: Vec<u8>,
    pub user_id: String,
    pub application_id: String,
}

/// Outcome of `prepare`, `create` and `create_via_recovery`: identifiers
/// in the clear, everything sensitive inside the layer-2 cryptogram.
#[derive(Debug, Clone)]
pub struct PreparedActivation {
    pub activation_id: String,
    pub user_id: String,
    pub application_id: String,
    pub cryptogram: EciesCryptogram,
}

/// Inner ECIES payload of an activation request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer2Request {
    pub device_public_key: String,
    #[serde(default)]
    pub activation_name: Option<String>,
    #[serde(default)]
    pub extras: Option<String>,
}

/// Inner ECIES payload of an activation response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer2Response {
    pub activation_id: String,
    pub server_public_key: String,
    pub ctr_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_recovery: Option<ActivationRecoveryPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRecoveryPayload {
    pub recovery_code: String,
    pub puk: String,
}

#[derive(Debug, Clone)]
pub struct ActivationStatusResponse {
    pub activation_id: String,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub activation_name: Option<String>,
    pub user_id: Option<String>,
    pub application_id: Option<String>,
    pub extras: Option<String>,
    pub version: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub encrypted_status_blob: Vec<u8>,
    pub status_blob_nonce: Option<Vec<u8>>,
    /// Present only while the activation awaits its device key, so the
    /// device can complete pairing.
    pub activation_code: Option<String>,
    pub activation_signature: Option<Vec<u8>>,
    pub device_public_key_fingerprint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActivationSummary {
    pub activation_id: String,
    pub activation_name: Option<String>,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub user_id: String,
    pub application_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct LookupCriteria {
    pub user_ids: Vec<String>,
    pub application_ids: Option<Vec<String>>,
    pub statuses: Option<Vec<ActivationStatus>>,
    pub last_used_before: Option<DateTime<Utc>>,
    pub last_used_after: Option<DateTime<Utc>>,
}

/// Parameters handed to a mediating server so it can open one request
/// envelope without ever holding a static private key.
#[derive(Debug)]
pub struct EciesDecryptorParameters {
    pub secret_key: Vec<u8>,
    pub shared_info2: Vec<u8>,
}
