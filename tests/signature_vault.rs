// tests/signature_vault.rs
mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::*;
use keyfort::core::crypto::cipher::aes_cbc_decrypt;
use keyfort::core::crypto::{ecies, kdf, keys, Ecies, EnvelopeKey, HashBasedCounter};
use keyfort::core::model::{ActivationStatus, SignatureType, BLOCKED_REASON_MAX_FAILED_ATTEMPTS};
use keyfort::utils::error::ServiceError;

async fn active_device(context: &TestContext, recovery: bool) -> (TestDevice, keyfort::core::model::ApplicationVersion) {
    let (application, version) = context.setup_application(recovery);
    let device = pair_device(context, &application, &version, "alice").await;
    context
        .activations
        .commit(&device.activation_id, None)
        .await
        .unwrap();
    (device, version)
}

#[tokio::test]
async fn online_signature_verifies_and_advances_counter() {
    let context = TestContext::new().await;
    let (mut device, version) = active_device(&context, false).await;

    let data = b"POST&/api/payment&nonce&body-hash";
    let signature = device.sign(data, SignatureType::PossessionKnowledge);

    let response = context
        .signatures
        .verify_signature(
            &device.activation_id,
            &version.application_key,
            SignatureType::PossessionKnowledge,
            data,
            &signature,
        )
        .await
        .unwrap();
    assert!(response.valid);
    assert_eq!(response.activation_status, ActivationStatus::Active);

    // The server advanced to the device's counter position.
    let activation = context
        .repositories
        .find_activation(&device.activation_id)
        .unwrap()
        .unwrap();
    assert_eq!(activation.ctr_data.as_deref(), Some(device.ctr_data.as_slice()));
    assert_eq!(activation.counter, 1);

    // A replay of the same signature is rejected.
    let replay = context
        .signatures
        .verify_signature(
            &device.activation_id,
            &version.application_key,
            SignatureType::PossessionKnowledge,
            data,
            &signature,
        )
        .await
        .unwrap();
    assert!(!replay.valid);
}

#[tokio::test]
async fn signature_lookahead_tolerates_device_drift() {
    let context = TestContext::new().await;
    let (mut device, version) = active_device(&context, false).await;

    // The device drifts ahead by a few positions (lost responses).
    device.ctr_data = HashBasedCounter::next(&device.ctr_data);
    device.ctr_data = HashBasedCounter::next(&device.ctr_data);

    let data = b"drifted request";
    let signature = device.sign(data, SignatureType::Possession);
    let response = context
        .signatures
        .verify_signature(
            &device.activation_id,
            &version.application_key,
            SignatureType::Possession,
            data,
            &signature,
        )
        .await
        .unwrap();
    assert!(response.valid);

    let activation = context
        .repositories
        .find_activation(&device.activation_id)
        .unwrap()
        .unwrap();
    assert_eq!(activation.counter, 3);
    assert_eq!(activation.ctr_data.as_deref(), Some(device.ctr_data.as_slice()));
}

#[tokio::test]
async fn failed_signatures_block_activation_at_threshold() {
    let context = TestContext::new().await;
    let (device, version) = active_device(&context, false).await;

    let max_attempts: u64 = 5;
    for attempt in 1..=max_attempts {
        let response = context
            .signatures
            .verify_signature(
                &device.activation_id,
                &version.application_key,
                SignatureType::Possession,
                b"request data",
                "00000000",
            )
            .await
            .unwrap();
        assert!(!response.valid);
        if attempt < max_attempts {
            assert_eq!(response.activation_status, ActivationStatus::Active);
            assert_eq!(response.remaining_attempts, max_attempts - attempt);
        } else {
            assert_eq!(response.activation_status, ActivationStatus::Blocked);
            assert_eq!(
                response.blocked_reason.as_deref(),
                Some(BLOCKED_REASON_MAX_FAILED_ATTEMPTS)
            );
        }
    }

    // Audit trail kept every attempt.
    let audit = context
        .signatures
        .get_signature_audit_log(
            "alice",
            None,
            chrono::Utc::now() - chrono::Duration::minutes(5),
            chrono::Utc::now() + chrono::Duration::minutes(5),
        )
        .unwrap();
    assert_eq!(audit.iter().filter(|r| !r.valid).count(), max_attempts as usize);
}

#[tokio::test]
async fn successful_signature_resets_failed_attempts() {
    let context = TestContext::new().await;
    let (mut device, version) = active_device(&context, false).await;

    for _ in 0..3 {
        context
            .signatures
            .verify_signature(
                &device.activation_id,
                &version.application_key,
                SignatureType::Possession,
                b"data",
                "99999999",
            )
            .await
            .unwrap();
    }

    let signature = device.sign(b"data", SignatureType::Possession);
    let response = context
        .signatures
        .verify_signature(
            &device.activation_id,
            &version.application_key,
            SignatureType::Possession,
            b"data",
            &signature,
        )
        .await
        .unwrap();
    assert!(response.valid);

    let activation = context
        .repositories
        .find_activation(&device.activation_id)
        .unwrap()
        .unwrap();
    assert_eq!(activation.failed_attempts, 0);
}

#[tokio::test]
async fn offline_signature_flow() {
    let context = TestContext::new().await;
    let (mut device, _version) = active_device(&context, false).await;

    // Server renders the offline payload, signed by its key.
    let payload = context
        .signatures
        .create_personalized_offline_payload(&device.activation_id, "amount=100&to=CZ65")
        .unwrap();
    let lines: Vec<&str> = payload.offline_data.split('\n').collect();
    assert_eq!(lines.len(), 3);

    // Device checks the server signature before signing.
    let mut signed = lines[0].as_bytes().to_vec();
    signed.extend_from_slice(&payload.nonce);
    let server_signature = STANDARD.decode(lines[2]).unwrap();
    assert!(keys::verify_signature(
        &device.server_public_key,
        &signed,
        &server_signature
    ));

    // Device signs with possession+knowledge; server accepts.
    let data = lines[0].as_bytes().to_vec();
    let signature = device.sign(&data, SignatureType::PossessionKnowledge);
    let response = context
        .signatures
        .verify_offline_signature(&device.activation_id, &data, &signature)
        .await
        .unwrap();
    assert!(response.valid);
    assert_eq!(response.signature_type, SignatureType::PossessionKnowledge);
}

#[tokio::test]
async fn ecdsa_device_signature_verification() {
    let context = TestContext::new().await;
    let (device, _version) = active_device(&context, false).await;

    let signature = keys::sign_data(&device.key_pair.private_key, b"signed by device");
    assert!(context
        .signatures
        .verify_ecdsa_signature(&device.activation_id, b"signed by device", &signature)
        .unwrap());
    assert!(!context
        .signatures
        .verify_ecdsa_signature(&device.activation_id, b"different data", &signature)
        .unwrap());
}

#[tokio::test]
async fn vault_unlock_releases_wrapped_key() {
    let context = TestContext::new().await;
    let (mut device, version) = active_device(&context, false).await;

    let (cryptogram, session) = device.activation_scope_request(
        &version,
        ecies::INFO1_VAULT_UNLOCK,
        b"{\"reason\":\"ADD_BIOMETRY\"}",
    );
    let data = b"vault unlock request";
    let signature = device.sign(data, SignatureType::PossessionKnowledge);

    let response = context
        .signatures
        .vault_unlock(
            &device.activation_id,
            &version.application_key,
            SignatureType::PossessionKnowledge,
            data,
            &signature,
            &cryptogram,
        )
        .await
        .unwrap();

    let payload = session.decrypt_request(&response).unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    let wrapped = STANDARD
        .decode(payload["encryptedVaultEncryptionKey"].as_str().unwrap())
        .unwrap();

    // The device unwraps the vault key with its transport key.
    let transport = device.transport_key();
    let vault_key = aes_cbc_decrypt(&transport, &[0u8; 16], &wrapped).unwrap();
    let expected = kdf::derive_vault_key(&device.shared_secret());
    assert_eq!(vault_key.as_slice(), expected.as_slice());
}

#[tokio::test]
async fn vault_unlock_rejects_bad_signature() {
    let context = TestContext::new().await;
    let (device, version) = active_device(&context, false).await;

    let (cryptogram, _) =
        device.activation_scope_request(&version, ecies::INFO1_VAULT_UNLOCK, b"{}");
    let result = context
        .signatures
        .vault_unlock(
            &device.activation_id,
            &version.application_key,
            SignatureType::PossessionKnowledge,
            b"vault unlock request",
            "12345678-12345678",
            &cryptogram,
        )
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidRequest)));
}

#[tokio::test]
async fn mediator_decryptor_matches_activation_scope() {
    let context = TestContext::new().await;
    let (device, version) = active_device(&context, false).await;

    let (cryptogram, _) = device.activation_scope_request(
        &version,
        ecies::INFO1_ACTIVATION,
        b"{\"mediated\":\"request\"}",
    );

    let parameters = context
        .activations
        .get_ecies_decryptor(
            &version.application_key,
            Some(&device.activation_id),
            cryptogram.ephemeral_public_key.as_deref().unwrap(),
        )
        .unwrap();

    // An independent decryptor built only from the exported parameters
    // reads the same plaintext.
    let envelope = EnvelopeKey::from_bytes(&parameters.secret_key).unwrap();
    let mediator = Ecies::with_envelope_key(envelope, parameters.shared_info2);
    assert_eq!(
        mediator.decrypt_request(&cryptogram).unwrap(),
        b"{\"mediated\":\"request\"}"
    );
}
