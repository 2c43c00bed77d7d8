use crate::error::AppError;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub error_type: &'static str,
    pub code: &'static str,
}

/// Map domain errors to HTTP responses.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorBody) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::Authentication => ("authentication_error", "AUTHENTICATION_REQUIRED"),
        AppError::Authorization => ("authorization_error", "FORBIDDEN"),
        AppError::Validation(_) => ("validation_error", "INVALID_REQUEST"),
        AppError::RateLimited { .. } => ("rate_limit_error", "RATE_LIMIT_EXCEEDED"),
        AppError::NotFound(_) => ("not_found_error", "NOT_FOUND"),
        AppError::Crypto(_) => ("crypto_error", "CRYPTO_FAILURE"),
        AppError::Database(_) => ("server_error", "DATABASE_ERROR"),
        AppError::Cache(_) => ("server_error", "CACHE_ERROR"),
        AppError::Config(_) | AppError::StartServer(_) => ("server_error", "INTERNAL_SERVER_ERROR"),
        AppError::Internal => ("server_error", "INTERNAL_SERVER_ERROR"),
    };

    let reason = match status {
        StatusCode::BAD_REQUEST => "Bad Request",
        StatusCode::UNAUTHORIZED => "Unauthorized",
        StatusCode::FORBIDDEN => "Forbidden",
        StatusCode::NOT_FOUND => "Not Found",
        StatusCode::TOO_MANY_REQUESTS => "Too Many Requests",
        StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
        _ => "Error",
    };

    let body = ErrorBody {
        error: reason.to_string(),
        message: err.to_string(),
        status: status.as_u16(),
        error_type,
        code,
    };

    (status, body)
}

pub fn into_response(err: AppError) -> impl IntoResponse {
    let (status, body) = map_error(&err);
    (status, Json(body))
}
