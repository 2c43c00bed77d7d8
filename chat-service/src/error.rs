use crate::middleware::error_handling;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("authentication required")]
    Authentication,

    #[error("forbidden")]
    Authorization,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Authentication => 401,
            AppError::Authorization => 403,
            AppError::NotFound(_) => 404,
            AppError::RateLimited { .. } => 429,
            AppError::Crypto(_)
            | AppError::Database(_)
            | AppError::Cache(_)
            | AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Internal => 500,
        }
    }
}

impl From<crypto_core::CryptoError> for AppError {
    fn from(err: crypto_core::CryptoError) -> Self {
        AppError::Crypto(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error_handling::into_response(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::Validation("x".into()).status_code(), 400);
        assert_eq!(AppError::Authentication.status_code(), 401);
        assert_eq!(AppError::Authorization.status_code(), 403);
        assert_eq!(AppError::NotFound("message").status_code(), 404);
        assert_eq!(
            AppError::RateLimited {
                retry_after_secs: 30
            }
            .status_code(),
            429
        );
        assert_eq!(AppError::Crypto("tag mismatch".into()).status_code(), 500);
    }

    #[test]
    fn crypto_error_converts() {
        let err: AppError = crypto_core::CryptoError::Decryption.into();
        assert!(matches!(err, AppError::Crypto(_)));
    }
}
