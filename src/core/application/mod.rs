// src/core/application/mod.rs
//! Application, version, callback-URL and integration management. An
//! application owns its versions (key/secret credentials) and one or more
//! master key pairs; the latest pair signs activation codes and anchors
//! application-scope ECIES.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::crypto::{codes, keys};
use crate::core::model::{Application, ApplicationVersion, CallbackUrl, Integration, MasterKeyPair};
use crate::storage::Repositories;
use crate::utils::error::{Result, ServiceError};

pub struct ApplicationService {
    repositories: Arc<Repositories>,
}

impl ApplicationService {
    pub fn new(repositories: Arc<Repositories>) -> Self {
        Self { repositories }
    }

    /// Creates an application with its first master key pair and an
    /// initial supported version.
    pub fn create_application(
        &self,
        name: &str,
        roles: Vec<String>,
        activation_recovery_enabled: bool,
    ) -> Result<Application> {
        if name.is_empty() {
            return Err(ServiceError::InvalidRequest);
        }

        let application = Application {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            roles,
            activation_recovery_enabled,
            created_at: Utc::now(),
        };
        self.repositories.save_application(&application)?;

        let master_pair = keys::generate_key_pair();
        let master = MasterKeyPair {
            id: Uuid::new_v4().to_string(),
            application_id: application.id.clone(),
            master_private_key: keys::export_private_key(&master_pair.private_key).to_vec(),
            master_public_key: keys::export_public_key(&master_pair.public_key),
            created_at: Utc::now(),
        };
        self.repositories.save_master_key_pair(&master)?;

        self.create_application_version(&application.id, "default")?;

        info!("Created application {} ({})", application.id, name);
        Ok(application)
    }

    pub fn get_application_list(&self) -> Result<Vec<Application>> {
        self.repositories.list_applications()
    }

    pub fn get_application_detail(
        &self,
        application_id: &str,
    ) -> Result<(Application, Vec<ApplicationVersion>, Option<Vec<u8>>)> {
        let application = self
            .repositories
            .find_application(application_id)?
            .ok_or(ServiceError::InvalidApplication)?;
        let versions = self.repositories.list_application_versions(application_id)?;
        let master_public_key = self
            .repositories
            .find_latest_master_key_pair(application_id)?
            .map(|m| m.master_public_key);
        Ok((application, versions, master_public_key))
    }

    pub fn create_application_version(
        &self,
        application_id: &str,
        _name: &str,
    ) -> Result<ApplicationVersion> {
        self.repositories
            .find_application(application_id)?
            .ok_or(ServiceError::InvalidApplication)?;

        let version = ApplicationVersion {
            id: Uuid::new_v4().to_string(),
            application_id: application_id.to_string(),
            application_key: codes::generate_application_credential(),
            application_secret: codes::generate_application_credential(),
            supported: true,
            created_at: Utc::now(),
        };
        self.repositories.save_application_version(&version)?;
        Ok(version)
    }

    pub fn support_application_version(
        &self,
        application_id: &str,
        version_id: &str,
    ) -> Result<ApplicationVersion> {
        self.set_version_support(application_id, version_id, true)
    }

    pub fn unsupport_application_version(
        &self,
        application_id: &str,
        version_id: &str,
    ) -> Result<ApplicationVersion> {
        self.set_version_support(application_id, version_id, false)
    }

    fn set_version_support(
        &self,
        application_id: &str,
        version_id: &str,
        supported: bool,
    ) -> Result<ApplicationVersion> {
        let mut version = self
            .repositories
            .list_application_versions(application_id)?
            .into_iter()
            .find(|v| v.id == version_id)
            .ok_or(ServiceError::InvalidApplication)?;
        version.supported = supported;
        self.repositories.save_application_version(&version)?;
        Ok(version)
    }

    // -- callback URLs ------------------------------------------------------

    pub fn create_callback_url(
        &self,
        application_id: &str,
        name: &str,
        url: &str,
        attributes: Vec<String>,
    ) -> Result<CallbackUrl> {
        self.repositories
            .find_application(application_id)?
            .ok_or(ServiceError::InvalidApplication)?;

        let parsed = reqwest::Url::parse(url).map_err(|_| ServiceError::InvalidUrlFormat)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ServiceError::InvalidUrlFormat);
        }

        let callback = CallbackUrl {
            id: Uuid::new_v4().to_string(),
            application_id: application_id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            attributes,
        };
        self.repositories.save_callback_url(&callback)?;
        Ok(callback)
    }

    pub fn get_callback_url_list(&self, application_id: &str) -> Result<Vec<CallbackUrl>> {
        self.repositories.list_callback_urls(application_id)
    }

    pub fn remove_callback_url(&self, application_id: &str, id: &str) -> Result<()> {
        self.repositories.delete_callback_url(application_id, id)
    }

    // -- integrations -------------------------------------------------------

    pub fn create_integration(&self, name: &str) -> Result<Integration> {
        let integration = Integration {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            client_token: codes::generate_application_credential(),
            client_secret: codes::generate_application_credential(),
        };
        self.repositories.save_integration(&integration)?;
        Ok(integration)
    }

    pub fn get_integration_list(&self) -> Result<Vec<Integration>> {
        self.repositories.list_integrations()
    }

    pub fn remove_integration(&self, id: &str) -> Result<()> {
        self.repositories.delete_integration(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EncryptedStore;
    use tempfile::tempdir;

    fn service() -> (ApplicationService, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(EncryptedStore::new(dir.path(), b"test key").unwrap());
        (ApplicationService::new(Arc::new(Repositories::new(store))), dir)
    }

    #[test]
    fn test_create_application_with_version_and_master_keypair() {
        let (service, _dir) = service();
        let application = service
            .create_application("internet-banking", vec!["ROLE_ADMIN".into()], true)
            .unwrap();

        let (detail, versions, master_public_key) =
            service.get_application_detail(&application.id).unwrap();
        assert_eq!(detail.name, "internet-banking");
        assert!(detail.activation_recovery_enabled);
        assert_eq!(versions.len(), 1);
        assert!(versions[0].supported);
        assert_eq!(master_public_key.unwrap().len(), 33);
    }

    #[test]
    fn test_version_support_toggle() {
        let (service, _dir) = service();
        let application = service.create_application("app", vec![], false).unwrap();
        let version = service
            .create_application_version(&application.id, "v2")
            .unwrap();

        let unsupported = service
            .unsupport_application_version(&application.id, &version.id)
            .unwrap();
        assert!(!unsupported.supported);

        let supported = service
            .support_application_version(&application.id, &version.id)
            .unwrap();
        assert!(supported.supported);
    }

    #[test]
    fn test_application_keys_are_unique() {
        let (service, _dir) = service();
        let application = service.create_application("app", vec![], false).unwrap();
        let a = service
            .create_application_version(&application.id, "a")
            .unwrap();
        let b = service
            .create_application_version(&application.id, "b")
            .unwrap();
        assert_ne!(a.application_key, b.application_key);
        assert_ne!(a.application_secret, b.application_secret);
    }

    #[test]
    fn test_callback_url_validation() {
        let (service, _dir) = service();
        let application = service.create_application("app", vec![], false).unwrap();

        let callback = service
            .create_callback_url(
                &application.id,
                "master backend",
                "https://backend.example.com/callback",
                vec!["userId".into()],
            )
            .unwrap();
        assert_eq!(service.get_callback_url_list(&application.id).unwrap().len(), 1);

        assert!(matches!(
            service.create_callback_url(&application.id, "bad", "not a url", vec![]),
            Err(ServiceError::InvalidUrlFormat)
        ));
        assert!(matches!(
            service.create_callback_url(&application.id, "bad", "ftp://x/y", vec![]),
            Err(ServiceError::InvalidUrlFormat)
        ));

        service
            .remove_callback_url(&application.id, &callback.id)
            .unwrap();
        assert!(service.get_callback_url_list(&application.id).unwrap().is_empty());
    }

    #[test]
    fn test_integration_lifecycle() {
        let (service, _dir) = service();
        let integration = service.create_integration("mobile gateway").unwrap();
        assert_eq!(service.get_integration_list().unwrap().len(), 1);
        service.remove_integration(&integration.id).unwrap();
        assert!(service.get_integration_list().unwrap().is_empty());
    }
}
