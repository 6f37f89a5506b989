pub mod api;
pub mod core;
pub mod storage;
pub mod utils;

use std::sync::Arc;
use tracing::info;

use crate::{
    core::activation::ActivationService,
    core::application::ApplicationService,
    core::callback::CallbackNotifier,
    core::crypto::KeyVault,
    core::recovery::RecoveryService,
    core::signature::SignatureService,
    core::token::TokenService,
    storage::{EncryptedStore, Repositories},
    utils::config::Config,
    utils::error::{Result, ServiceError},
};

pub struct Application {
    config: Arc<Config>,
    activation_service: Arc<ActivationService>,
    application_service: Arc<ApplicationService>,
    token_service: Arc<TokenService>,
    signature_service: Arc<SignatureService>,
}

impl Application {
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        info!("Initializing storage...");
        let store = Arc::new(
            EncryptedStore::new(&config.storage.path, config.storage.encryption_key.as_bytes())
                .map_err(|e| ServiceError::Storage(e.to_string()))?,
        );
        let repositories = Arc::new(Repositories::new(store));

        info!("Initializing key vault...");
        let vault = Arc::new(KeyVault::from_config(&config.crypto)?);

        info!("Initializing services...");
        let notifier = Arc::new(CallbackNotifier::new(&config.callbacks, repositories.clone())?);
        let recovery_service = Arc::new(RecoveryService::new(
            repositories.clone(),
            vault.clone(),
            config.activation.clone(),
        ));
        let activation_service = Arc::new(ActivationService::new(
            repositories.clone(),
            vault.clone(),
            recovery_service.clone(),
            notifier.clone(),
            config.activation.clone(),
        ));
        let application_service = Arc::new(ApplicationService::new(repositories.clone()));
        let token_service = Arc::new(TokenService::new(
            repositories.clone(),
            vault.clone(),
            config.activation.clone(),
        ));
        let signature_service = Arc::new(SignatureService::new(
            repositories,
            vault,
            notifier,
            config.activation.clone(),
        ));

        Ok(Self {
            config,
            activation_service,
            application_service,
            token_service,
            signature_service,
        })
    }

    pub async fn serve(&self) -> Result<()> {
        use actix_cors::Cors;
        use actix_web::{web, App, HttpServer};
        use crate::api::handlers;

        let activation_service = self.activation_service.clone();
        let application_service = self.application_service.clone();
        let token_service = self.token_service.clone();
        let signature_service = self.signature_service.clone();

        info!(
            "Starting API server on {}:{}",
            self.config.server.host, self.config.server.port
        );
        HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::from(activation_service.clone()))
                .app_data(web::Data::from(application_service.clone()))
                .app_data(web::Data::from(token_service.clone()))
                .app_data(web::Data::from(signature_service.clone()))
                .service(handlers::activation::scope())
                .service(handlers::application::scope())
                .service(handlers::token::scope())
                .service(handlers::signature::scope())
                .service(handlers::signature::vault_scope())
                .service(handlers::system::scope())
        })
        .bind((self.config.server.host.as_str(), self.config.server.port))
        .map_err(|e| ServiceError::Unknown(format!("Failed to bind API server: {}", e)))?
        .run()
        .await
        .map_err(|e| ServiceError::Unknown(format!("API server failed: {}", e)))?;

        Ok(())
    }
}
