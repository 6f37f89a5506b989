// src/api/handlers/signature.rs
use actix_web::{web, HttpResponse, Scope};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use crate::api::types::*;
use crate::core::model::SignatureType;
use crate::core::signature::{SignatureService, SignatureVerifyResponse};
use crate::utils::error::{Result, ServiceError};

pub fn scope() -> Scope {
    web::scope("/rest/v3/signature")
        .service(web::resource("/verify").route(web::post().to(verify)))
        .service(
            web::resource("/offline/personalized/create")
                .route(web::post().to(create_personalized_offline)),
        )
        .service(
            web::resource("/offline/nonpersonalized/create")
                .route(web::post().to(create_non_personalized_offline)),
        )
        .service(web::resource("/offline/verify").route(web::post().to(verify_offline)))
        .service(web::resource("/ecdsa/verify").route(web::post().to(verify_ecdsa)))
        .service(web::resource("/audit").route(web::post().to(audit)))
}

pub fn vault_scope() -> Scope {
    web::scope("/rest/v3/vault")
        .service(web::resource("/unlock").route(web::post().to(vault_unlock)))
}

fn verify_json(response: &SignatureVerifyResponse) -> serde_json::Value {
    json!({
        "signatureValid": response.valid,
        "activationId": response.activation_id,
        "userId": response.user_id,
        "applicationId": response.application_id,
        "activationStatus": response.activation_status.as_str(),
        "blockedReason": response.blocked_reason,
        "remainingAttempts": response.remaining_attempts,
        "signatureType": response.signature_type.as_str(),
    })
}

async fn verify(
    service: web::Data<SignatureService>,
    request: web::Json<VerifySignatureDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let signature_type = SignatureType::parse(&request.signature_type)
        .ok_or(ServiceError::InvalidInputFormat)?;
    let data = decode_base64(&request.data)?;

    let response = service
        .verify_signature(
            &request.activation_id,
            &request.application_key,
            signature_type,
            &data,
            &request.signature,
        )
        .await?;
    Ok(HttpResponse::Ok().json(verify_json(&response)))
}

async fn create_personalized_offline(
    service: web::Data<SignatureService>,
    request: web::Json<PersonalizedOfflinePayloadDto>,
) -> Result<HttpResponse> {
    let payload =
        service.create_personalized_offline_payload(&request.activation_id, &request.data)?;
    Ok(HttpResponse::Ok().json(json!({
        "offlineData": payload.offline_data,
        "nonce": STANDARD.encode(&payload.nonce),
    })))
}

async fn create_non_personalized_offline(
    service: web::Data<SignatureService>,
    request: web::Json<NonPersonalizedOfflinePayloadDto>,
) -> Result<HttpResponse> {
    let payload =
        service.create_non_personalized_offline_payload(&request.application_id, &request.data)?;
    Ok(HttpResponse::Ok().json(json!({
        "offlineData": payload.offline_data,
        "nonce": STANDARD.encode(&payload.nonce),
    })))
}

async fn verify_offline(
    service: web::Data<SignatureService>,
    request: web::Json<VerifyOfflineSignatureDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let data = decode_base64(&request.data)?;
    let response = service
        .verify_offline_signature(&request.activation_id, &data, &request.signature)
        .await?;
    Ok(HttpResponse::Ok().json(verify_json(&response)))
}

async fn verify_ecdsa(
    service: web::Data<SignatureService>,
    request: web::Json<VerifyEcdsaSignatureDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let data = decode_base64(&request.data)?;
    let signature = decode_base64(&request.signature)?;
    let valid = service.verify_ecdsa_signature(&request.activation_id, &data, &signature)?;
    Ok(HttpResponse::Ok().json(json!({ "signatureValid": valid })))
}

async fn vault_unlock(
    service: web::Data<SignatureService>,
    request: web::Json<VaultUnlockDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let signature_type = SignatureType::parse(&request.signature_type)
        .ok_or(ServiceError::InvalidInputFormat)?;
    let data = decode_base64(&request.data)?;
    let cryptogram = request.cryptogram.decode()?;

    let response = service
        .vault_unlock(
            &request.activation_id,
            &request.application_key,
            signature_type,
            &data,
            &request.signature,
            &cryptogram,
        )
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "encryptedData": STANDARD.encode(&response.encrypted_data),
        "mac": STANDARD.encode(&response.mac),
    })))
}

async fn audit(
    service: web::Data<SignatureService>,
    request: web::Json<SignatureAuditDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let records = service.get_signature_audit_log(
        &request.user_id,
        request.application_id.as_deref(),
        request.timestamp_from,
        request.timestamp_to,
    )?;
    let items: Vec<_> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "activationId": r.activation_id,
                "applicationId": r.application_id,
                "userId": r.user_id,
                "signatureType": r.signature_type.as_str(),
                "signatureVersion": r.signature_version,
                "counter": r.counter,
                "data": STANDARD.encode(&r.data),
                "signature": r.signature,
                "valid": r.valid,
                "note": r.note,
                "timestampCreated": r.created_at,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "items": items })))
}
