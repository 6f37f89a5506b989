// src/storage/repository.rs
//! Typed repositories over the encrypted store. Rows live under typed key
//! prefixes; secondary lookups go through manually maintained index
//! entries written in the same atomic batch as the row itself.
//!
//! Locking discipline: reads are lock-free; any state transition acquires
//! the per-activation mutex through `lock_activation` and re-reads the
//! row under the guard before writing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::encrypted::{BatchOp, EncryptedStore};
use crate::core::model::{
    Activation, ActivationHistoryRecord, ActivationStatus, Application, ApplicationVersion,
    CallbackUrl, Integration, MasterKeyPair, RecoveryCode, RecoveryPuk, SignatureAuditRecord,
    Token,
};
use crate::utils::error::{Result, ServiceError};

pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Repositories {
    store: Arc<EncryptedStore>,
    locks: LockRegistry,
}

fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ServiceError::Storage(e.to_string()))
}

impl Repositories {
    pub fn new(store: Arc<EncryptedStore>) -> Self {
        Self {
            store,
            locks: LockRegistry::new(),
        }
    }

    /// Row-level pessimistic write lock for one activation. The caller
    /// must re-read the row after acquiring the guard.
    pub async fn lock_activation(&self, activation_id: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(activation_id).await
    }

    // -- applications -------------------------------------------------------

    pub fn save_application(&self, application: &Application) -> Result<()> {
        self.store
            .put(format!("application/{}", application.id).as_bytes(), application)?;
        Ok(())
    }

    pub fn find_application(&self, id: &str) -> Result<Option<Application>> {
        Ok(self.store.get(format!("application/{}", id).as_bytes())?)
    }

    pub fn list_applications(&self) -> Result<Vec<Application>> {
        Ok(self.store.scan_prefix(b"application/")?)
    }

    pub fn save_application_version(&self, version: &ApplicationVersion) -> Result<()> {
        self.store.apply_batch(vec![
            BatchOp::Put {
                key: format!("app_version/{}/{}", version.application_id, version.id).into_bytes(),
                value: serialize(version)?,
            },
            BatchOp::Put {
                key: format!("idx/app_key/{}", version.application_key).into_bytes(),
                value: serialize(&(version.application_id.clone(), version.id.clone()))?,
            },
        ])?;
        Ok(())
    }

    pub fn find_application_version_by_key(
        &self,
        application_key: &str,
    ) -> Result<Option<ApplicationVersion>> {
        let reference: Option<(String, String)> = self
            .store
            .get(format!("idx/app_key/{}", application_key).as_bytes())?;
        match reference {
            Some((application_id, version_id)) => Ok(self
                .store
                .get(format!("app_version/{}/{}", application_id, version_id).as_bytes())?),
            None => Ok(None),
        }
    }

    pub fn list_application_versions(&self, application_id: &str) -> Result<Vec<ApplicationVersion>> {
        Ok(self
            .store
            .scan_prefix(format!("app_version/{}/", application_id).as_bytes())?)
    }

    pub fn save_master_key_pair(&self, key_pair: &MasterKeyPair) -> Result<()> {
        // Key carries the creation timestamp so a prefix scan yields
        // chronological order and the latest pair is the last entry.
        let key = format!(
            "master_keypair/{}/{:020}/{}",
            key_pair.application_id,
            key_pair.created_at.timestamp_millis(),
            key_pair.id
        );
        self.store.put(key.as_bytes(), key_pair)?;
        Ok(())
    }

    pub fn find_latest_master_key_pair(
        &self,
        application_id: &str,
    ) -> Result<Option<MasterKeyPair>> {
        let pairs: Vec<MasterKeyPair> = self
            .store
            .scan_prefix(format!("master_keypair/{}/", application_id).as_bytes())?;
        Ok(pairs.into_iter().last())
    }

    pub fn find_master_key_pair(
        &self,
        application_id: &str,
        key_pair_id: &str,
    ) -> Result<Option<MasterKeyPair>> {
        let pairs: Vec<MasterKeyPair> = self
            .store
            .scan_prefix(format!("master_keypair/{}/", application_id).as_bytes())?;
        Ok(pairs.into_iter().find(|p| p.id == key_pair_id))
    }

    // -- activations --------------------------------------------------------

    fn activation_ops(&self, activation: &Activation) -> Result<Vec<BatchOp>> {
        let mut ops = vec![
            BatchOp::Put {
                key: format!("activation/{}", activation.activation_id).into_bytes(),
                value: serialize(activation)?,
            },
            BatchOp::Put {
                key: format!(
                    "idx/user_act/{}/{}",
                    activation.user_id, activation.activation_id
                )
                .into_bytes(),
                value: serialize(&activation.activation_id)?,
            },
        ];

        // The activation-code index only resolves codes of CREATED
        // activations; it is dropped on the first transition away.
        if let Some(code) = &activation.activation_code {
            let index_key = format!(
                "idx/code/{}/{}",
                activation.application_id, code
            )
            .into_bytes();
            if activation.status == ActivationStatus::Created {
                ops.push(BatchOp::Put {
                    key: index_key,
                    value: serialize(&activation.activation_id)?,
                });
            } else {
                ops.push(BatchOp::Delete { key: index_key });
            }
        }

        Ok(ops)
    }

    pub fn save_activation(&self, activation: &Activation) -> Result<()> {
        self.store.apply_batch(self.activation_ops(activation)?)?;
        Ok(())
    }

    /// Persists the activation row and its history record atomically.
    pub fn save_activation_with_history(
        &self,
        activation: &Activation,
        history: &ActivationHistoryRecord,
    ) -> Result<()> {
        let mut ops = self.activation_ops(activation)?;
        ops.push(BatchOp::Put {
            key: history_key(history),
            value: serialize(history)?,
        });
        self.store.apply_batch(ops)?;
        Ok(())
    }

    pub fn find_activation(&self, activation_id: &str) -> Result<Option<Activation>> {
        Ok(self
            .store
            .get(format!("activation/{}", activation_id).as_bytes())?)
    }

    pub fn find_activation_by_code(
        &self,
        application_id: &str,
        activation_code: &str,
    ) -> Result<Option<Activation>> {
        let id: Option<String> = self
            .store
            .get(format!("idx/code/{}/{}", application_id, activation_code).as_bytes())?;
        match id {
            Some(id) => self.find_activation(&id),
            None => Ok(None),
        }
    }

    pub fn list_activations_by_user(
        &self,
        user_id: &str,
        application_id: Option<&str>,
    ) -> Result<Vec<Activation>> {
        let ids: Vec<String> = self
            .store
            .scan_prefix(format!("idx/user_act/{}/", user_id).as_bytes())?;
        let mut activations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(activation) = self.find_activation(&id)? {
                if application_id.map_or(true, |app| activation.application_id == app) {
                    activations.push(activation);
                }
            }
        }
        Ok(activations)
    }

    // -- activation history -------------------------------------------------

    pub fn append_history(&self, record: &ActivationHistoryRecord) -> Result<()> {
        self.store.put(&history_key(record), record)?;
        Ok(())
    }

    pub fn list_history(
        &self,
        activation_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ActivationHistoryRecord>> {
        let records: Vec<ActivationHistoryRecord> = self
            .store
            .scan_prefix(format!("history/{}/", activation_id).as_bytes())?;
        Ok(records
            .into_iter()
            .filter(|r| r.created_at >= from && r.created_at <= to)
            .collect())
    }

    // -- signature audit ----------------------------------------------------

    pub fn append_audit(&self, record: &SignatureAuditRecord) -> Result<()> {
        let key = format!(
            "audit/{}/{:020}/{}",
            record.user_id,
            record.created_at.timestamp_millis(),
            record.id
        );
        self.store.put(key.as_bytes(), record)?;
        Ok(())
    }

    pub fn list_audit(
        &self,
        user_id: &str,
        application_id: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SignatureAuditRecord>> {
        let records: Vec<SignatureAuditRecord> = self
            .store
            .scan_prefix(format!("audit/{}/", user_id).as_bytes())?;
        Ok(records
            .into_iter()
            .filter(|r| r.created_at >= from && r.created_at <= to)
            .filter(|r| application_id.map_or(true, |app| r.application_id == app))
            .collect())
    }

    // -- recovery codes -----------------------------------------------------

    pub fn save_recovery_code(&self, code: &RecoveryCode) -> Result<()> {
        let mut ops = vec![
            BatchOp::Put {
                key: format!("recovery/{}", code.id).into_bytes(),
                value: serialize(code)?,
            },
            BatchOp::Put {
                key: format!("idx/recovery_code/{}/{}", code.application_id, code.recovery_code)
                    .into_bytes(),
                value: serialize(&code.id)?,
            },
        ];
        if let Some(activation_id) = &code.activation_id {
            ops.push(BatchOp::Put {
                key: format!("idx/recovery_act/{}/{}", activation_id, code.id).into_bytes(),
                value: serialize(&code.id)?,
            });
        }
        self.store.apply_batch(ops)?;
        Ok(())
    }

    pub fn find_recovery_code(&self, id: &str) -> Result<Option<RecoveryCode>> {
        Ok(self.store.get(format!("recovery/{}", id).as_bytes())?)
    }

    pub fn find_recovery_code_by_code(
        &self,
        application_id: &str,
        recovery_code: &str,
    ) -> Result<Option<RecoveryCode>> {
        let id: Option<String> = self
            .store
            .get(format!("idx/recovery_code/{}/{}", application_id, recovery_code).as_bytes())?;
        match id {
            Some(id) => self.find_recovery_code(&id),
            None => Ok(None),
        }
    }

    pub fn list_recovery_codes_by_activation(
        &self,
        activation_id: &str,
    ) -> Result<Vec<RecoveryCode>> {
        let ids: Vec<String> = self
            .store
            .scan_prefix(format!("idx/recovery_act/{}/", activation_id).as_bytes())?;
        let mut codes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(code) = self.find_recovery_code(&id)? {
                codes.push(code);
            }
        }
        Ok(codes)
    }

    pub fn save_recovery_puk(&self, puk: &RecoveryPuk) -> Result<()> {
        let key = format!("recovery_puk/{}/{:010}", puk.recovery_code_id, puk.puk_index);
        self.store.put(key.as_bytes(), puk)?;
        Ok(())
    }

    /// PUKs of one recovery code, ordered by `puk_index`.
    pub fn list_recovery_puks(&self, recovery_code_id: &str) -> Result<Vec<RecoveryPuk>> {
        Ok(self
            .store
            .scan_prefix(format!("recovery_puk/{}/", recovery_code_id).as_bytes())?)
    }

    // -- tokens -------------------------------------------------------------

    pub fn save_token(&self, token: &Token) -> Result<()> {
        self.store
            .put(format!("token/{}", token.token_id).as_bytes(), token)?;
        Ok(())
    }

    pub fn find_token(&self, token_id: &str) -> Result<Option<Token>> {
        Ok(self.store.get(format!("token/{}", token_id).as_bytes())?)
    }

    pub fn delete_token(&self, token_id: &str) -> Result<()> {
        self.store.delete(format!("token/{}", token_id).as_bytes())?;
        Ok(())
    }

    // -- callback URLs ------------------------------------------------------

    pub fn save_callback_url(&self, callback: &CallbackUrl) -> Result<()> {
        let key = format!("callback/{}/{}", callback.application_id, callback.id);
        self.store.put(key.as_bytes(), callback)?;
        Ok(())
    }

    pub fn list_callback_urls(&self, application_id: &str) -> Result<Vec<CallbackUrl>> {
        Ok(self
            .store
            .scan_prefix(format!("callback/{}/", application_id).as_bytes())?)
    }

    pub fn delete_callback_url(&self, application_id: &str, id: &str) -> Result<()> {
        self.store
            .delete(format!("callback/{}/{}", application_id, id).as_bytes())?;
        Ok(())
    }

    // -- integrations -------------------------------------------------------

    pub fn save_integration(&self, integration: &Integration) -> Result<()> {
        self.store
            .put(format!("integration/{}", integration.id).as_bytes(), integration)?;
        Ok(())
    }

    pub fn list_integrations(&self) -> Result<Vec<Integration>> {
        Ok(self.store.scan_prefix(b"integration/")?)
    }

    pub fn delete_integration(&self, id: &str) -> Result<()> {
        self.store.delete(format!("integration/{}", id).as_bytes())?;
        Ok(())
    }
}

fn history_key(record: &ActivationHistoryRecord) -> Vec<u8> {
    format!(
        "history/{}/{:020}/{}",
        record.activation_id,
        record.created_at.timestamp_millis(),
        record.id
    )
    .into_bytes()
}
