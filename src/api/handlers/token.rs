// src/api/handlers/token.rs
use actix_web::{web, HttpResponse, Scope};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use crate::api::types::*;
use crate::core::model::SignatureType;
use crate::core::token::TokenService;
use crate::utils::error::{Result, ServiceError};

pub fn scope() -> Scope {
    web::scope("/rest/v3/token")
        .service(web::resource("/create").route(web::post().to(create)))
        .service(web::resource("/validate").route(web::post().to(validate)))
        .service(web::resource("/remove").route(web::post().to(remove)))
}

async fn create(
    service: web::Data<TokenService>,
    request: web::Json<CreateTokenDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let signature_type = SignatureType::parse(&request.signature_type)
        .ok_or(ServiceError::InvalidInputFormat)?;
    let cryptogram = request.cryptogram.decode()?;

    let response = service
        .create_token(
            &request.activation_id,
            &request.application_key,
            &cryptogram,
            signature_type,
        )
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "encryptedData": STANDARD.encode(&response.encrypted_data),
        "mac": STANDARD.encode(&response.mac),
    })))
}

async fn validate(
    service: web::Data<TokenService>,
    request: web::Json<ValidateTokenDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let nonce = decode_base64(&request.nonce)?;
    let digest = decode_base64(&request.token_digest)?;

    let response = service.validate_token(&request.token_id, &nonce, request.timestamp, &digest)?;
    Ok(HttpResponse::Ok().json(json!({
        "tokenValid": response.valid,
        "activationId": response.activation_id,
        "userId": response.user_id,
        "applicationId": response.application_id,
        "signatureType": response.signature_type.map(|t| t.as_str()),
    })))
}

async fn remove(
    service: web::Data<TokenService>,
    request: web::Json<RemoveTokenDto>,
) -> Result<HttpResponse> {
    let removed = service.remove_token(&request.token_id, &request.activation_id)?;
    Ok(HttpResponse::Ok().json(json!({ "removed": removed })))
}
