// src/api/handlers/system.rs
use actix_web::{web, HttpResponse, Scope};
use chrono::Utc;
use serde_json::json;

use crate::utils::error::ServiceError;

pub fn scope() -> Scope {
    web::scope("/rest/v3")
        .service(web::resource("/status").route(web::post().to(get_system_status)))
        .service(web::resource("/error/list").route(web::post().to(get_error_code_list)))
}

pub async fn get_system_status() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "OK",
        "applicationName": "keyfort",
        "applicationDisplayName": "Keyfort Authentication Server",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
}

pub async fn get_error_code_list() -> HttpResponse {
    let errors: Vec<_> = ServiceError::error_code_list()
        .into_iter()
        .map(|(code, message)| json!({"code": code, "value": message}))
        .collect();
    HttpResponse::Ok().json(json!({ "errors": errors }))
}
