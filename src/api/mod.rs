// src/api/mod.rs
pub mod handlers;
pub mod types;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

use crate::utils::error::ServiceError;

impl actix_web::ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({
            "status": "ERROR",
            "code": self.code(),
            "message": self.to_string(),
        });
        if let ServiceError::InvalidRecoveryCode {
            current_puk_index: Some(index),
        } = self
        {
            body["currentPukIndex"] = json!(index);
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}
