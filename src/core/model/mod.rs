// src/core/model/mod.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::crypto::sealing::SealedRecord;

/// Reason recorded when the server blocks an activation on its own.
pub const BLOCKED_REASON_MAX_FAILED_ATTEMPTS: &str = "MAX_FAILED_ATTEMPTS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    Created,
    OtpUsed,
    Active,
    Blocked,
    Removed,
}

impl ActivationStatus {
    /// Status code carried in byte 0 of the status blob.
    pub fn byte_code(&self) -> u8 {
        match self {
            ActivationStatus::Created => 1,
            ActivationStatus::OtpUsed => 2,
            ActivationStatus::Active => 3,
            ActivationStatus::Blocked => 4,
            ActivationStatus::Removed => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationStatus::Created => "CREATED",
            ActivationStatus::OtpUsed => "OTP_USED",
            ActivationStatus::Active => "ACTIVE",
            ActivationStatus::Blocked => "BLOCKED",
            ActivationStatus::Removed => "REMOVED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(ActivationStatus::Created),
            "OTP_USED" => Some(ActivationStatus::OtpUsed),
            "ACTIVE" => Some(ActivationStatus::Active),
            "BLOCKED" => Some(ActivationStatus::Blocked),
            "REMOVED" => Some(ActivationStatus::Removed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryCodeStatus {
    Created,
    Active,
    Blocked,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryPukStatus {
    Valid,
    Used,
    Invalid,
}

/// Authentication factor combination a signature was computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Possession,
    Knowledge,
    Biometry,
    PossessionKnowledge,
    PossessionBiometry,
    PossessionKnowledgeBiometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFactor {
    Possession,
    Knowledge,
    Biometry,
}

impl SignatureType {
    /// Factors in signing order.
    pub fn factors(&self) -> &'static [SignatureFactor] {
        use SignatureFactor::*;
        match self {
            SignatureType::Possession => &[Possession],
            SignatureType::Knowledge => &[Knowledge],
            SignatureType::Biometry => &[Biometry],
            SignatureType::PossessionKnowledge => &[Possession, Knowledge],
            SignatureType::PossessionBiometry => &[Possession, Biometry],
            SignatureType::PossessionKnowledgeBiometry => &[Possession, Knowledge, Biometry],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Possession => "possession",
            SignatureType::Knowledge => "knowledge",
            SignatureType::Biometry => "biometry",
            SignatureType::PossessionKnowledge => "possession_knowledge",
            SignatureType::PossessionBiometry => "possession_biometry",
            SignatureType::PossessionKnowledgeBiometry => "possession_knowledge_biometry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "possession" => Some(SignatureType::Possession),
            "knowledge" => Some(SignatureType::Knowledge),
            "biometry" => Some(SignatureType::Biometry),
            "possession_knowledge" => Some(SignatureType::PossessionKnowledge),
            "possession_biometry" => Some(SignatureType::PossessionBiometry),
            "possession_knowledge_biometry" => Some(SignatureType::PossessionKnowledgeBiometry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub roles: Vec<String>,
    /// Whether activations of this application are issued recovery codes.
    pub activation_recovery_enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationVersion {
    pub id: String,
    pub application_id: String,
    /// Public identifier of the version, unique across all applications.
    pub application_key: String,
    /// Bearer secret of the version.
    pub application_secret: String,
    pub supported: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterKeyPair {
    pub id: String,
    pub application_id: String,
    pub master_private_key: Vec<u8>,
    pub master_public_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// The central entity: a binding of a user identity to a device key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub activation_id: String,
    pub application_id: String,
    pub user_id: String,
    pub activation_name: Option<String>,
    pub activation_code: Option<String>,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    /// Legacy v2 numeric counter; maintained alongside `ctr_data`.
    pub counter: u64,
    /// v3 hash-based counter state, 16 bytes once the device key arrives.
    pub ctr_data: Option<Vec<u8>>,
    pub device_public_key: Option<Vec<u8>>,
    pub server_private_key: SealedRecord,
    pub server_public_key: Vec<u8>,
    pub failed_attempts: u64,
    pub max_failed_attempts: u64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub master_keypair_id: String,
    pub version: Option<u32>,
    pub extras: Option<String>,
    pub flags: Vec<String>,
}

impl Activation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            ActivationStatus::Created | ActivationStatus::OtpUsed
        ) && self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub id: String,
    pub application_id: String,
    pub user_id: String,
    pub activation_id: Option<String>,
    pub recovery_code: String,
    pub status: RecoveryCodeStatus,
    pub failed_attempts: u64,
    pub max_failed_attempts: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPuk {
    pub id: String,
    pub recovery_code_id: String,
    /// 1-based; PUKs are consumed strictly in index order.
    pub puk_index: u64,
    pub puk_hash: SealedRecord,
    pub status: RecoveryPukStatus,
    pub last_changed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token_id: String,
    pub token_secret: Vec<u8>,
    pub activation_id: String,
    pub signature_type_created: SignatureType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackUrl {
    pub id: String,
    pub application_id: String,
    pub name: String,
    pub url: String,
    /// Which activation fields the callback payload carries.
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationHistoryRecord {
    pub id: String,
    pub activation_id: String,
    pub status: ActivationStatus,
    pub event_reason: Option<String>,
    pub external_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActivationHistoryRecord {
    pub fn for_activation(
        activation: &Activation,
        event_reason: Option<String>,
        external_user_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            activation_id: activation.activation_id.clone(),
            status: activation.status,
            event_reason,
            external_user_id,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureAuditRecord {
    pub id: String,
    pub activation_id: String,
    pub application_id: String,
    pub user_id: String,
    pub signature_type: SignatureType,
    pub signature_version: Option<String>,
    pub counter: u64,
    pub ctr_data: Option<Vec<u8>>,
    pub data: Vec<u8>,
    pub signature: String,
    pub valid: bool,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    pub name: String,
    pub client_token: String,
    pub client_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::sealing::EncryptionMode;

    fn sample_activation(status: ActivationStatus) -> Activation {
        Activation {
            activation_id: "a-1".into(),
            application_id: "app-1".into(),
            user_id: "alice".into(),
            activation_name: None,
            activation_code: Some("AAAAA-BBBBB-CCCCC-DDDDD".into()),
            status,
            blocked_reason: None,
            counter: 0,
            ctr_data: None,
            device_public_key: None,
            server_private_key: SealedRecord {
                mode: EncryptionMode::NoEncryption,
                data: vec![],
            },
            server_public_key: vec![],
            failed_attempts: 0,
            max_failed_attempts: 5,
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            created_at: Utc::now(),
            last_used_at: None,
            last_changed_at: None,
            master_keypair_id: "mkp-1".into(),
            version: None,
            extras: None,
            flags: vec![],
        }
    }

    #[test]
    fn test_expiry_only_in_pending_states() {
        let now = Utc::now();
        assert!(sample_activation(ActivationStatus::Created).is_expired(now));
        assert!(sample_activation(ActivationStatus::OtpUsed).is_expired(now));
        assert!(!sample_activation(ActivationStatus::Active).is_expired(now));
        assert!(!sample_activation(ActivationStatus::Blocked).is_expired(now));
        assert!(!sample_activation(ActivationStatus::Removed).is_expired(now));
    }

    #[test]
    fn test_status_byte_codes() {
        assert_eq!(ActivationStatus::Created.byte_code(), 1);
        assert_eq!(ActivationStatus::OtpUsed.byte_code(), 2);
        assert_eq!(ActivationStatus::Active.byte_code(), 3);
        assert_eq!(ActivationStatus::Blocked.byte_code(), 4);
        assert_eq!(ActivationStatus::Removed.byte_code(), 5);
    }

    #[test]
    fn test_signature_type_factor_order() {
        assert_eq!(
            SignatureType::PossessionKnowledgeBiometry.factors(),
            &[
                SignatureFactor::Possession,
                SignatureFactor::Knowledge,
                SignatureFactor::Biometry
            ]
        );
    }

    #[test]
    fn test_signature_type_parse_roundtrip() {
        for st in [
            SignatureType::Possession,
            SignatureType::Knowledge,
            SignatureType::Biometry,
            SignatureType::PossessionKnowledge,
            SignatureType::PossessionBiometry,
            SignatureType::PossessionKnowledgeBiometry,
        ] {
            assert_eq!(SignatureType::parse(st.as_str()), Some(st));
        }
        assert_eq!(SignatureType::parse("bogus"), None);
    }
}
