// tests/common/mod.rs
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use zeroize::Zeroizing;

use keyfort::core::activation::types::InitActivationRequest;
use keyfort::core::activation::ActivationService;
use keyfort::core::application::ApplicationService;
use keyfort::core::callback::CallbackNotifier;
use keyfort::core::crypto::sealing::EncryptionMode;
use keyfort::core::crypto::{cipher, codes, ecies, kdf, keys, Ecies, EciesCryptogram, KeyVault};
use keyfort::core::model::{Application, ApplicationVersion, SignatureType};
use keyfort::core::recovery::RecoveryService;
use keyfort::core::signature::{compute_signature, derive_factor_keys, SignatureService};
use keyfort::core::token::TokenService;
use keyfort::storage::{EncryptedStore, Repositories};
use keyfort::utils::config::{ActivationConfig, CallbackConfig};

pub struct TestContext {
    pub activations: Arc<ActivationService>,
    pub applications: ApplicationService,
    pub tokens: TokenService,
    pub signatures: SignatureService,
    pub repositories: Arc<Repositories>,
    _dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EncryptedStore::new(dir.path(), b"integration test key").unwrap());
        let repositories = Arc::new(Repositories::new(store));
        let vault = Arc::new(KeyVault::new(
            b"integration master secret".to_vec(),
            EncryptionMode::AesHmac,
        ));
        let notifier = Arc::new(
            CallbackNotifier::new(&CallbackConfig::default(), repositories.clone()).unwrap(),
        );
        let recovery = Arc::new(RecoveryService::new(
            repositories.clone(),
            vault.clone(),
            ActivationConfig::default(),
        ));
        let activations = Arc::new(ActivationService::new(
            repositories.clone(),
            vault.clone(),
            recovery,
            notifier.clone(),
            ActivationConfig::default(),
        ));
        let applications = ApplicationService::new(repositories.clone());
        let tokens = TokenService::new(
            repositories.clone(),
            vault.clone(),
            ActivationConfig::default(),
        );
        let signatures = SignatureService::new(
            repositories.clone(),
            vault,
            notifier,
            ActivationConfig::default(),
        );

        Self {
            activations,
            applications,
            tokens,
            signatures,
            repositories,
            _dir: dir,
        }
    }

    pub fn setup_application(&self, recovery_enabled: bool) -> (Application, ApplicationVersion) {
        let application = self
            .applications
            .create_application("integration-app", vec![], recovery_enabled)
            .unwrap();
        let version = self
            .repositories
            .list_application_versions(&application.id)
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        (application, version)
    }

    pub fn master_public_key(&self, application: &Application) -> p256::PublicKey {
        let master = self
            .repositories
            .find_latest_master_key_pair(&application.id)
            .unwrap()
            .unwrap();
        keys::import_public_key(&master.master_public_key).unwrap()
    }
}

/// Client half of the protocol for one paired device.
pub struct TestDevice {
    pub key_pair: keys::EcKeyPair,
    pub activation_id: String,
    pub activation_code: String,
    pub server_public_key: p256::PublicKey,
    pub ctr_data: Vec<u8>,
    pub recovery: Option<(String, String)>,
}

impl TestDevice {
    pub fn shared_secret(&self) -> Zeroizing<Vec<u8>> {
        keys::shared_secret(&self.key_pair.private_key, &self.server_public_key)
    }

    pub fn transport_key(&self) -> Zeroizing<Vec<u8>> {
        kdf::derive_transport_key(&self.shared_secret())
    }

    /// Advances the local counter and computes the signature, mirroring
    /// the device behavior of signing with a pre-advanced counter.
    pub fn sign(&mut self, data: &[u8], signature_type: SignatureType) -> String {
        self.ctr_data = keyfort::core::crypto::HashBasedCounter::next(&self.ctr_data);
        let factor_keys = derive_factor_keys(&self.shared_secret(), signature_type);
        compute_signature(&factor_keys, data, &self.ctr_data)
    }

    /// Builds an activation-scoped request cryptogram for this device.
    pub fn activation_scope_request(
        &self,
        version: &ApplicationVersion,
        shared_info1: &'static [u8],
        payload: &[u8],
    ) -> (EciesCryptogram, Ecies) {
        ecies::encrypt_request(
            &self.server_public_key,
            shared_info1,
            ecies::shared_info2_activation(
                &version.application_secret,
                Some(&self.transport_key()),
            ),
            payload,
            Some(cipher::random_bytes(16)),
        )
        .unwrap()
    }
}

/// Runs init + prepare for a fresh device and returns the client state.
pub async fn pair_device(
    context: &TestContext,
    application: &Application,
    version: &ApplicationVersion,
    user_id: &str,
) -> TestDevice {
    let initialized = context
        .activations
        .init(InitActivationRequest {
            application_id: application.id.clone(),
            user_id: user_id.to_string(),
            max_failure_count: None,
            expire_at: None,
        })
        .await
        .unwrap();

    let device = keys::generate_key_pair();
    let (cryptogram, session) = layer2_request(context, application, version, &device);

    let prepared = context
        .activations
        .prepare(&initialized.activation_code, &version.application_key, &cryptogram)
        .await
        .unwrap();
    assert_eq!(prepared.activation_id, initialized.activation_id);

    decode_layer2_response(&session, &prepared.cryptogram, device, initialized.activation_code)
}

/// Builds the layer-2 cryptogram carrying a device public key.
pub fn layer2_request(
    context: &TestContext,
    application: &Application,
    version: &ApplicationVersion,
    device: &keys::EcKeyPair,
) -> (EciesCryptogram, Ecies) {
    let master_public = context.master_public_key(application);
    let payload = json!({
        "devicePublicKey": STANDARD.encode(keys::export_public_key(&device.public_key)),
        "activationName": "integration device",
    });
    ecies::encrypt_request(
        &master_public,
        ecies::INFO1_ACTIVATION_LAYER2,
        ecies::shared_info2_application(&version.application_secret),
        payload.to_string().as_bytes(),
        Some(cipher::random_bytes(16)),
    )
    .unwrap()
}

/// Decrypts a layer-2 response and assembles the device-side state.
pub fn decode_layer2_response(
    session: &Ecies,
    cryptogram: &EciesCryptogram,
    device: keys::EcKeyPair,
    activation_code: String,
) -> TestDevice {
    let response = session.decrypt_request(cryptogram).unwrap();
    let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

    let activation_id = response["activationId"].as_str().unwrap().to_string();
    let server_public_key = keys::import_public_key(
        &STANDARD
            .decode(response["serverPublicKey"].as_str().unwrap())
            .unwrap(),
    )
    .unwrap();
    let ctr_data = STANDARD
        .decode(response["ctrData"].as_str().unwrap())
        .unwrap();
    let recovery = response.get("activationRecovery").and_then(|r| {
        Some((
            r.get("recoveryCode")?.as_str()?.to_string(),
            r.get("puk")?.as_str()?.to_string(),
        ))
    });

    TestDevice {
        key_pair: device,
        activation_id,
        activation_code,
        server_public_key,
        ctr_data,
        recovery,
    }
}

/// Valid-looking but never-issued activation code for negative tests.
pub fn unknown_activation_code() -> String {
    codes::generate_code()
}
