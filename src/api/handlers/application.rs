// src/api/handlers/application.rs
use actix_web::{web, HttpResponse, Scope};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use crate::api::types::*;
use crate::core::application::ApplicationService;
use crate::core::model::{Application, ApplicationVersion};
use crate::utils::error::Result;

pub fn scope() -> Scope {
    web::scope("/rest/v3/application")
        .service(web::resource("/create").route(web::post().to(create)))
        .service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/detail").route(web::post().to(detail)))
        .service(web::resource("/version/create").route(web::post().to(create_version)))
        .service(web::resource("/version/support").route(web::post().to(support_version)))
        .service(web::resource("/version/unsupport").route(web::post().to(unsupport_version)))
        .service(web::resource("/callback/create").route(web::post().to(create_callback)))
        .service(web::resource("/callback/list").route(web::post().to(list_callbacks)))
        .service(web::resource("/callback/remove").route(web::post().to(remove_callback)))
        .service(web::resource("/integration/create").route(web::post().to(create_integration)))
        .service(web::resource("/integration/list").route(web::post().to(list_integrations)))
        .service(web::resource("/integration/remove").route(web::post().to(remove_integration)))
}

fn application_json(application: &Application) -> serde_json::Value {
    json!({
        "applicationId": application.id,
        "applicationName": application.name,
        "applicationRoles": application.roles,
        "activationRecoveryEnabled": application.activation_recovery_enabled,
    })
}

fn version_json(version: &ApplicationVersion) -> serde_json::Value {
    json!({
        "applicationVersionId": version.id,
        "applicationKey": version.application_key,
        "applicationSecret": version.application_secret,
        "supported": version.supported,
    })
}

async fn create(
    service: web::Data<ApplicationService>,
    request: web::Json<CreateApplicationDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let application = service.create_application(
        &request.application_name,
        request.application_roles,
        request.activation_recovery_enabled,
    )?;
    Ok(HttpResponse::Ok().json(application_json(&application)))
}

async fn list(service: web::Data<ApplicationService>) -> Result<HttpResponse> {
    let applications = service.get_application_list()?;
    Ok(HttpResponse::Ok().json(json!({
        "applications": applications.iter().map(application_json).collect::<Vec<_>>(),
    })))
}

async fn detail(
    service: web::Data<ApplicationService>,
    request: web::Json<ApplicationIdDto>,
) -> Result<HttpResponse> {
    let (application, versions, master_public_key) =
        service.get_application_detail(&request.application_id)?;
    Ok(HttpResponse::Ok().json(json!({
        "applicationId": application.id,
        "applicationName": application.name,
        "applicationRoles": application.roles,
        "activationRecoveryEnabled": application.activation_recovery_enabled,
        "masterPublicKey": master_public_key.as_deref().map(|b| STANDARD.encode(b)),
        "versions": versions.iter().map(version_json).collect::<Vec<_>>(),
    })))
}

async fn create_version(
    service: web::Data<ApplicationService>,
    request: web::Json<CreateApplicationVersionDto>,
) -> Result<HttpResponse> {
    let version = service.create_application_version(
        &request.application_id,
        &request.application_version_name,
    )?;
    Ok(HttpResponse::Ok().json(version_json(&version)))
}

async fn support_version(
    service: web::Data<ApplicationService>,
    request: web::Json<ApplicationVersionIdDto>,
) -> Result<HttpResponse> {
    let version = service
        .support_application_version(&request.application_id, &request.application_version_id)?;
    Ok(HttpResponse::Ok().json(version_json(&version)))
}

async fn unsupport_version(
    service: web::Data<ApplicationService>,
    request: web::Json<ApplicationVersionIdDto>,
) -> Result<HttpResponse> {
    let version = service
        .unsupport_application_version(&request.application_id, &request.application_version_id)?;
    Ok(HttpResponse::Ok().json(version_json(&version)))
}

async fn create_callback(
    service: web::Data<ApplicationService>,
    request: web::Json<CreateCallbackUrlDto>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let callback = service.create_callback_url(
        &request.application_id,
        &request.name,
        &request.callback_url,
        request.attributes,
    )?;
    Ok(HttpResponse::Ok().json(json!({
        "id": callback.id,
        "applicationId": callback.application_id,
        "name": callback.name,
        "callbackUrl": callback.url,
        "attributes": callback.attributes,
    })))
}

async fn list_callbacks(
    service: web::Data<ApplicationService>,
    request: web::Json<ApplicationIdDto>,
) -> Result<HttpResponse> {
    let callbacks = service.get_callback_url_list(&request.application_id)?;
    let items: Vec<_> = callbacks
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "applicationId": c.application_id,
                "name": c.name,
                "callbackUrl": c.url,
                "attributes": c.attributes,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "callbackUrlList": items })))
}

async fn remove_callback(
    service: web::Data<ApplicationService>,
    request: web::Json<RemoveCallbackUrlDto>,
) -> Result<HttpResponse> {
    service.remove_callback_url(&request.application_id, &request.id)?;
    Ok(HttpResponse::Ok().json(json!({ "removed": true })))
}

async fn create_integration(
    service: web::Data<ApplicationService>,
    request: web::Json<CreateIntegrationDto>,
) -> Result<HttpResponse> {
    let integration = service.create_integration(&request.name)?;
    Ok(HttpResponse::Ok().json(json!({
        "id": integration.id,
        "name": integration.name,
        "clientToken": integration.client_token,
        "clientSecret": integration.client_secret,
    })))
}

async fn list_integrations(service: web::Data<ApplicationService>) -> Result<HttpResponse> {
    let integrations = service.get_integration_list()?;
    let items: Vec<_> = integrations
        .iter()
        .map(|i| {
            json!({
                "id": i.id,
                "name": i.name,
                "clientToken": i.client_token,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "items": items })))
}

async fn remove_integration(
    service: web::Data<ApplicationService>,
    request: web::Json<RemoveIntegrationDto>,
) -> Result<HttpResponse> {
    service.remove_integration(&request.id)?;
    Ok(HttpResponse::Ok().json(json!({ "removed": true })))
}
