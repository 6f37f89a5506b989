// src/api/handlers/activation.rs
use actix_web::{web, HttpResponse, Scope};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use crate::api::types::*;
use crate::core::activation::types::{InitActivationRequest, LookupCriteria};
use crate::core::activation::ActivationService;
use crate::core::model::ActivationStatus;
use crate::utils::error::{Result, ServiceError};

pub fn scope() -> Scope {
    web::scope("/rest/v3/activation")
        .service(web::resource("/init").route(web::post().to(init)))
        .service(web::resource("/prepare").route(web::post().to(prepare)))
        .service(web::resource("/create").route(web::post().to(create)))
        .service(web::resource("/commit").route(web::post().to(commit)))
        .service(web::resource("/status").route(web::post().to(status)))
        .service(web::resource("/block").route(web::post().to(block)))
        .service(web::resource("/unblock").route(web::post().to(unblock)))
        .service(web::resource("/remove").route(web::post().to(remove)))
        .service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/lookup").route(web::post().to(lookup)))
        .service(web::resource("/status/update").route(web::post().to(update_status_bulk)))
        .service(web::resource("/history").route(web::post().to(history)))
        .service(web::resource("/recovery/create").route(web::post().to(create_via_recovery)))
        .service(web::resource("/upgrade/start").route(web::post().to(start_upgrade)))
        .service(web::resource("/upgrade/commit").route(web::post().to(commit_upgrade)))
        .service(web::resource("/ecies/decryptor").route(web::post().to(get_ecies_decryptor)))
}

async fn init(
    service: web::Data<ActivationService>,
    request: web::Json<InitActivationDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let response = service
        .init(InitActivationRequest {
            application_id: request.application_id,
            user_id: request.user_id,
            max_failure_count: request.max_failure_count,
            expire_at: request.timestamp_activation_expire,
        })
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "activationId": response.activation_id,
        "activationCode": response.activation_code,
        "activationSignature": STANDARD.encode(&response.activation_signature),
        "userId": response.user_id,
        "applicationId": response.application_id,
    })))
}

async fn prepare(
    service: web::Data<ActivationService>,
    request: web::Json<PrepareActivationDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let cryptogram = request.cryptogram.decode()?;
    let prepared = service
        .prepare(&request.activation_code, &request.application_key, &cryptogram)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "activationId": prepared.activation_id,
        "userId": prepared.user_id,
        "applicationId": prepared.application_id,
        "encryptedData": STANDARD.encode(&prepared.cryptogram.encrypted_data),
        "mac": STANDARD.encode(&prepared.cryptogram.mac),
    })))
}

async fn create(
    service: web::Data<ActivationService>,
    request: web::Json<CreateActivationDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let cryptogram = request.cryptogram.decode()?;
    let prepared = service
        .create(
            &request.user_id,
            &request.application_key,
            request.max_failure_count,
            request.timestamp_activation_expire,
            &cryptogram,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "activationId": prepared.activation_id,
        "userId": prepared.user_id,
        "applicationId": prepared.application_id,
        "encryptedData": STANDARD.encode(&prepared.cryptogram.encrypted_data),
        "mac": STANDARD.encode(&prepared.cryptogram.mac),
    })))
}

async fn commit(
    service: web::Data<ActivationService>,
    request: web::Json<ActivationIdDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let activated = service
        .commit(&request.activation_id, request.external_user_id.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "activationId": request.activation_id,
        "activated": activated,
    })))
}

async fn status(
    service: web::Data<ActivationService>,
    request: web::Json<ActivationStatusDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let challenge = request
        .challenge
        .as_deref()
        .map(decode_base64)
        .transpose()?;
    let response = service
        .get_status(&request.activation_id, challenge.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "activationId": response.activation_id,
        "activationStatus": response.status.as_str(),
        "blockedReason": response.blocked_reason,
        "activationName": response.activation_name,
        "userId": response.user_id,
        "applicationId": response.application_id,
        "extras": response.extras,
        "version": response.version,
        "timestampCreated": response.created_at,
        "timestampLastUsed": response.last_used_at,
        "timestampLastChange": response.last_changed_at,
        "encryptedStatusBlob": STANDARD.encode(&response.encrypted_status_blob),
        "encryptedStatusBlobNonce": response.status_blob_nonce.as_deref().map(|b| STANDARD.encode(b)),
        "activationCode": response.activation_code,
        "activationSignature": response.activation_signature.as_deref().map(|b| STANDARD.encode(b)),
        "devicePublicKeyFingerprint": response.device_public_key_fingerprint,
    })))
}

async fn block(
    service: web::Data<ActivationService>,
    request: web::Json<BlockActivationDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let status = service
        .block(
            &request.activation_id,
            request.reason.as_deref(),
            request.external_user_id.as_deref(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "activationId": request.activation_id,
        "activationStatus": status.as_str(),
    })))
}

async fn unblock(
    service: web::Data<ActivationService>,
    request: web::Json<ActivationIdDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let status = service
        .unblock(&request.activation_id, request.external_user_id.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "activationId": request.activation_id,
        "activationStatus": status.as_str(),
    })))
}

async fn remove(
    service: web::Data<ActivationService>,
    request: web::Json<ActivationIdDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let removed = service
        .remove(&request.activation_id, request.external_user_id.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "activationId": request.activation_id,
        "removed": removed,
    })))
}

fn summary_json(summary: &crate::core::activation::types::ActivationSummary) -> serde_json::Value {
    json!({
        "activationId": summary.activation_id,
        "activationName": summary.activation_name,
        "activationStatus": summary.status.as_str(),
        "blockedReason": summary.blocked_reason,
        "userId": summary.user_id,
        "applicationId": summary.application_id,
        "timestampCreated": summary.created_at,
        "timestampLastUsed": summary.last_used_at,
        "version": summary.version,
    })
}

async fn list(
    service: web::Data<ActivationService>,
    request: web::Json<ActivationListDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let activations = service
        .get_list(&request.user_id, request.application_id.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "activations": activations.iter().map(summary_json).collect::<Vec<_>>(),
    })))
}

async fn lookup(
    service: web::Data<ActivationService>,
    request: web::Json<LookupActivationsDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let statuses = request
        .activation_statuses
        .map(|statuses| {
            statuses
                .iter()
                .map(|s| ActivationStatus::parse(s).ok_or(ServiceError::InvalidInputFormat))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;

    let activations = service
        .lookup(&LookupCriteria {
            user_ids: request.user_ids,
            application_ids: request.application_ids,
            statuses,
            last_used_before: request.timestamp_last_used_before,
            last_used_after: request.timestamp_last_used_after,
        })
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "activations": activations.iter().map(summary_json).collect::<Vec<_>>(),
    })))
}

async fn update_status_bulk(
    service: web::Data<ActivationService>,
    request: web::Json<UpdateStatusBulkDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let status = ActivationStatus::parse(&request.activation_status)
        .ok_or(ServiceError::InvalidInputFormat)?;
    service
        .update_status_bulk(
            &request.activation_ids,
            status,
            request.external_user_id.as_deref(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "updated": true })))
}

async fn history(
    service: web::Data<ActivationService>,
    request: web::Json<ActivationHistoryDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let records = service.get_history(
        &request.activation_id,
        request.timestamp_from,
        request.timestamp_to,
    )?;
    let items: Vec<_> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "activationId": r.activation_id,
                "activationStatus": r.status.as_str(),
                "eventReason": r.event_reason,
                "externalUserId": r.external_user_id,
                "timestampCreated": r.created_at,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "items": items })))
}

async fn create_via_recovery(
    service: web::Data<ActivationService>,
    request: web::Json<RecoveryActivationDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let cryptogram = request.cryptogram.decode()?;
    let prepared = service
        .create_via_recovery(
            &request.recovery_code,
            &request.puk,
            &request.application_key,
            request.max_failure_count,
            &cryptogram,
        )
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "activationId": prepared.activation_id,
        "userId": prepared.user_id,
        "applicationId": prepared.application_id,
        "encryptedData": STANDARD.encode(&prepared.cryptogram.encrypted_data),
        "mac": STANDARD.encode(&prepared.cryptogram.mac),
    })))
}

async fn start_upgrade(
    service: web::Data<ActivationService>,
    request: web::Json<StartUpgradeDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let cryptogram = request.cryptogram.decode()?;
    let response = service
        .start_upgrade(&request.activation_id, &request.application_key, &cryptogram)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "encryptedData": STANDARD.encode(&response.encrypted_data),
        "mac": STANDARD.encode(&response.mac),
    })))
}

async fn commit_upgrade(
    service: web::Data<ActivationService>,
    request: web::Json<CommitUpgradeDto>,
) -> Result<HttpResponse> {
    let committed = service.commit_upgrade(&request.activation_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "committed": committed })))
}

async fn get_ecies_decryptor(
    service: web::Data<ActivationService>,
    request: web::Json<GetEciesDecryptorDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let ephemeral = decode_base64(&request.ephemeral_public_key)?;
    let parameters = service.get_ecies_decryptor(
        &request.application_key,
        request.activation_id.as_deref(),
        &ephemeral,
    )?;
    Ok(HttpResponse::Ok().json(json!({
        "secretKey": STANDARD.encode(&parameters.secret_key),
        "sharedInfo2": STANDARD.encode(&parameters.shared_info2),
    })))
}
