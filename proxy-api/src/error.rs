//! The control plane's response error type: every handler failure becomes a
//! `{ "success": false, "error": string }` body with an appropriate status
//! code (SPEC_FULL.md §6), via a single error enum implementing
//! `actix_web::ResponseError`.

use actix_web::{HttpResponse, ResponseError};
use proxy_common::StoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid query parameters: {0}")]
    BadRequest(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status = match self {
            ApiError::BadRequest(_) => actix_web::http::StatusCode::BAD_REQUEST,
            ApiError::Store(_) => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}
