use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::repo::RepoError;

/// Wire shape for every error response. `validation_errors` carries the
/// per-field messages of a 400 validation failure; `details` is reserved for
/// operational endpoints that report a cause.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(rename = "validationErrors", skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<BTreeMap<&'static str, String>>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Validation failed")]
    Validation(BTreeMap<&'static str, String>),
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Too many requests")]
    TooManyRequests,
    // Stored block JSON that no longer parses; surfaced apart from the
    // generic 500 so corrupted posts are recognizable.
    #[error("Invalid post content format")]
    ContentFormat,
    #[error("Internal server error")]
    Internal(String),
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound("Not found".to_string()),
            RepoError::Conflict => ApiError::Conflict("Conflict".to_string()),
            RepoError::Forbidden => ApiError::Forbidden("Forbidden".to_string()),
            RepoError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ContentFormat | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let ApiError::Internal(detail) = self {
            log::error!("internal error: {}", detail);
        }
        let validation_errors = match self {
            ApiError::Validation(errors) => Some(errors.clone()),
            _ => None,
        };
        HttpResponse::build(status).json(ApiErrorBody {
            error: self.to_string(),
            details: None,
            validation_errors,
        })
    }
}

/// Keeps body-deserialization failures in the same wire shape as every
/// other error instead of actix's plain-text default.
pub fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    let body = ApiErrorBody {
        error: "Invalid JSON payload".to_string(),
        details: Some(err.to_string()),
        validation_errors: None,
    };
    actix_web::error::InternalError::from_response(err, HttpResponse::BadRequest().json(body))
        .into()
}
