// src/core/recovery/mod.rs
//! Recovery codes and PUKs. A code is issued next to an activation during
//! pairing, becomes usable when the activation is committed, and is
//! consumed PUK by PUK in strict index order. Wrong guesses are throttled
//! per code; exhausting them blocks the code and invalidates the PUK that
//! was being guessed.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::crypto::{codes, password, KeyVault};
use crate::core::model::{RecoveryCode, RecoveryCodeStatus, RecoveryPuk, RecoveryPukStatus};
use crate::storage::Repositories;
use crate::utils::config::ActivationConfig;
use crate::utils::error::{Result, ServiceError};

/// Plaintext recovery material returned to the device exactly once,
/// inside the encrypted activation layer-2 response.
#[derive(Debug, Clone)]
pub struct IssuedRecovery {
    pub recovery_code: String,
    pub puk: String,
}

pub struct RecoveryService {
    repositories: Arc<Repositories>,
    vault: Arc<KeyVault>,
    config: ActivationConfig,
}

impl RecoveryService {
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

    /// Issues one recovery code with one VALID PUK, in `CREATED` status,
    /// bound to the activation. The code value is rejection-sampled
    /// against uniqueness within the application.
    pub fn issue_for_activation(
        &self,
        application_id: &str,
        user_id: &str,
        activation_id: &str,
    ) -> Result<IssuedRecovery> {
        for _ in 0..self.config.recovery_code_generation_iterations {
            let recovery_code = codes::generate_code();
            if self
                .repositories
                .find_recovery_code_by_code(application_id, &recovery_code)?
                .is_some()
            {
                continue;
            }

            let puk = codes::generate_puk();
            let puk_hash = password::hash_puk(&puk)?;
            let sealed = self.vault.seal(
                puk_hash.as_bytes(),
                &[application_id, user_id, recovery_code.as_str(), "1"],
            )?;

            let code_entity = RecoveryCode {
                id: Uuid::new_v4().to_string(),
                application_id: application_id.to_string(),
                user_id: user_id.to_string(),
                activation_id: Some(activation_id.to_string()),
                recovery_code: recovery_code.clone(),
                status: RecoveryCodeStatus::Created,
                failed_attempts: 0,
                max_failed_attempts: self.config.recovery_max_failed_attempts,
                created_at: Utc::now(),
            };
            let puk_entity = RecoveryPuk {
                id: Uuid::new_v4().to_string(),
                recovery_code_id: code_entity.id.clone(),
                puk_index: 1,
                puk_hash: sealed,
                status: RecoveryPukStatus::Valid,
                last_changed_at: None,
            };

            self.repositories.save_recovery_code(&code_entity)?;
            self.repositories.save_recovery_puk(&puk_entity)?;

            info!(
                "Issued recovery code for activation {} (user {})",
                activation_id, user_id
            );
            return Ok(IssuedRecovery { recovery_code, puk });
        }

        Err(ServiceError::UnableToGenerateRecoveryCode)
    }

    /// Flips `CREATED` codes of the activation to `ACTIVE`; called when
    /// the activation itself is committed.
    pub fn activate_for_activation(&self, activation_id: &str) -> Result<()> {
        for mut code in self
            .repositories
            .list_recovery_codes_by_activation(activation_id)?
        {
            if code.status == RecoveryCodeStatus::Created {
                code.status = RecoveryCodeStatus::Active;
                self.repositories.save_recovery_code(&code)?;
            }
        }
        Ok(())
    }

    /// Revokes outstanding codes of a removed activation.
    pub fn revoke_for_activation(&self, activation_id: &str) -> Result<()> {
        for mut code in self
            .repositories
            .list_recovery_codes_by_activation(activation_id)?
        {
            if matches!(
                code.status,
                RecoveryCodeStatus::Created | RecoveryCodeStatus::Active
            ) {
                code.status = RecoveryCodeStatus::Revoked;
                self.repositories.save_recovery_code(&code)?;
            }
        }
        Ok(())
    }

    /// Verifies a candidate PUK against the lowest-index VALID PUK of the
    /// code. On success that PUK becomes USED, the failure counter resets
    /// and, with no VALID PUK left, the code is revoked. On mismatch the
    /// failure counter advances and may block the code.
    pub fn verify_puk(
        &self,
        application_id: &str,
        recovery_code: &str,
        puk: &str,
    ) -> Result<RecoveryCode> {
        let mut code = self
            .repositories
            .find_recovery_code_by_code(application_id, recovery_code)?
            .ok_or(ServiceError::InvalidRecoveryCode {
                current_puk_index: None,
            })?;
        let puks = self.repositories.list_recovery_puks(&code.id)?;

        if code.status != RecoveryCodeStatus::Active {
            return Err(ServiceError::InvalidRecoveryCode {
                current_puk_index: last_consumed_index(&puks),
            });
        }

        let mut current = puks
            .iter()
            .filter(|p| p.status == RecoveryPukStatus::Valid)
            .min_by_key(|p| p.puk_index)
            .cloned()
            .ok_or(ServiceError::InvalidRecoveryCode {
                current_puk_index: last_consumed_index(&puks),
            })?;

        let context_index = current.puk_index.to_string();
        let context = [
            application_id,
            code.user_id.as_str(),
            recovery_code,
            context_index.as_str(),
        ];
        let hash_bytes = self.vault.open(&current.puk_hash, &context)?;
        let hash = std::str::from_utf8(&hash_bytes)
            .map_err(|_| ServiceError::GenericCryptographyError)?;

        if password::verify_puk(puk, hash)? {
            current.status = RecoveryPukStatus::Used;
            current.last_changed_at = Some(Utc::now());
            self.repositories.save_recovery_puk(&current)?;

            code.failed_attempts = 0;
            let valid_remaining = puks
                .iter()
                .any(|p| p.status == RecoveryPukStatus::Valid && p.puk_index != current.puk_index);
            if !valid_remaining {
                code.status = RecoveryCodeStatus::Revoked;
            }
            self.repositories.save_recovery_code(&code)?;
            Ok(code)
        } else {
            code.failed_attempts += 1;
            if code.failed_attempts >= code.max_failed_attempts {
                code.status = RecoveryCodeStatus::Blocked;
                current.status = RecoveryPukStatus::Invalid;
                current.last_changed_at = Some(Utc::now());
                self.repositories.save_recovery_puk(&current)?;
                info!("Recovery code {} blocked after too many failed attempts", code.id);
            }
            self.repositories.save_recovery_code(&code)?;
            Err(ServiceError::InvalidRecoveryCode {
                current_puk_index: Some(current.puk_index),
            })
        }
    }
}

/// Index of the PUK that terminated a code, reported in the error payload
/// when the code can no longer be used.
fn last_consumed_index(puks: &[RecoveryPuk]) -> Option<u64> {
    puks.iter()
        .filter(|p| {
            matches!(
                p.status,
                RecoveryPukStatus::Used | RecoveryPukStatus::Invalid
            )
        })
        .map(|p| p.puk_index)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::sealing::EncryptionMode;
    use crate::storage::EncryptedStore;
    use tempfile::tempdir;

    fn service() -> (RecoveryService, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(EncryptedStore::new(dir.path(), b"test key").unwrap());
        let repositories = Arc::new(Repositories::new(store));
        let vault = Arc::new(KeyVault::new(
            b"master secret".to_vec(),
            EncryptionMode::AesHmac,
        ));
        (
            RecoveryService::new(repositories, vault, ActivationConfig::default()),
            dir,
        )
    }

    fn issue_active(service: &RecoveryService) -> IssuedRecovery {
        let issued = service
            .issue_for_activation("app-1", "alice", "act-1")
            .unwrap();
        service.activate_for_activation("act-1").unwrap();
        issued
    }

    #[test]
    fn test_issue_creates_created_code_with_valid_puk() {
        let (service, _dir) = service();
        let issued = service
            .issue_for_activation("app-1", "alice", "act-1")
            .unwrap();
        assert!(codes::validate_code(&issued.recovery_code));
        assert_eq!(issued.puk.len(), 4);

        let code = service
            .repositories
            .find_recovery_code_by_code("app-1", &issued.recovery_code)
            .unwrap()
            .unwrap();
        assert_eq!(code.status, RecoveryCodeStatus::Created);

        let puks = service.repositories.list_recovery_puks(&code.id).unwrap();
        assert_eq!(puks.len(), 1);
        assert_eq!(puks[0].status, RecoveryPukStatus::Valid);
        assert_eq!(puks[0].puk_index, 1);
    }

    #[test]
    fn test_verify_rejects_created_code() {
        let (service, _dir) = service();
        let issued = service
            .issue_for_activation("app-1", "alice", "act-1")
            .unwrap();

        let result = service.verify_puk("app-1", &issued.recovery_code, &issued.puk);
        assert!(matches!(
            result,
            Err(ServiceError::InvalidRecoveryCode {
                current_puk_index: None
            })
        ));
    }

    #[test]
    fn test_verify_success_consumes_puk_and_revokes() {
        let (service, _dir) = service();
        let issued = issue_active(&service);

        let code = service
            .verify_puk("app-1", &issued.recovery_code, &issued.puk)
            .unwrap();
        // Single-PUK code: consuming the only PUK revokes the code.
        assert_eq!(code.status, RecoveryCodeStatus::Revoked);

        let puks = service.repositories.list_recovery_puks(&code.id).unwrap();
        assert_eq!(puks[0].status, RecoveryPukStatus::Used);

        // Second use reports the consumed index.
        let reuse = service.verify_puk("app-1", &issued.recovery_code, &issued.puk);
        assert!(matches!(
            reuse,
            Err(ServiceError::InvalidRecoveryCode {
                current_puk_index: Some(1)
            })
        ));
    }

    #[test]
    fn test_throttling_blocks_at_threshold() {
        let (service, _dir) = service();
        let issued = issue_active(&service);
        let wrong = if issued.puk == "0000" { "0001" } else { "0000" };
        let max = ActivationConfig::default().recovery_max_failed_attempts;

        for attempt in 1..max {
            let result = service.verify_puk("app-1", &issued.recovery_code, wrong);
            assert!(matches!(
                result,
                Err(ServiceError::InvalidRecoveryCode {
                    current_puk_index: Some(1)
                })
            ));
            let code = service
                .repositories
                .find_recovery_code_by_code("app-1", &issued.recovery_code)
                .unwrap()
                .unwrap();
            assert_eq!(code.failed_attempts, attempt);
            assert_eq!(code.status, RecoveryCodeStatus::Active);
        }

        // The final wrong guess blocks the code and invalidates the PUK.
        let result = service.verify_puk("app-1", &issued.recovery_code, wrong);
        assert!(result.is_err());
        let code = service
            .repositories
            .find_recovery_code_by_code("app-1", &issued.recovery_code)
            .unwrap()
            .unwrap();
        assert_eq!(code.status, RecoveryCodeStatus::Blocked);
        let puks = service.repositories.list_recovery_puks(&code.id).unwrap();
        assert_eq!(puks[0].status, RecoveryPukStatus::Invalid);

        // Correct PUK no longer helps; the invalidated index is reported.
        let result = service.verify_puk("app-1", &issued.recovery_code, &issued.puk);
        assert!(matches!(
            result,
            Err(ServiceError::InvalidRecoveryCode {
                current_puk_index: Some(1)
            })
        ));
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let (service, _dir) = service();
        let issued = issue_active(&service);
        let wrong = if issued.puk == "0000" { "0001" } else { "0000" };

        let _ = service.verify_puk("app-1", &issued.recovery_code, wrong);
        let code = service
            .verify_puk("app-1", &issued.recovery_code, &issued.puk)
            .unwrap();
        assert_eq!(code.failed_attempts, 0);
    }

    #[test]
    fn test_revoke_for_activation() {
        let (service, _dir) = service();
        let issued = issue_active(&service);

        service.revoke_for_activation("act-1").unwrap();
        let code = service
            .repositories
            .find_recovery_code_by_code("app-1", &issued.recovery_code)
            .unwrap()
            .unwrap();
        assert_eq!(code.status, RecoveryCodeStatus::Revoked);
    }

    #[test]
    fn test_unknown_code_rejected() {
        let (service, _dir) = service();
        let result = service.verify_puk("app-1", "AAAAA-BBBBB-CCCCC-DDDDD", "1234");
        assert!(matches!(
            result,
            Err(ServiceError::InvalidRecoveryCode {
                current_puk_index: None
            })
        ));
    }
}
