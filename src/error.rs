//! Error types for fedsig
//!
//! All errors in the crate are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::federation::Rejection;

/// Crate-wide error type
///
/// Startup failures (`Config`) are fatal. Everything else is returned to the
/// immediate caller of a single signing, delivery or verification attempt.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid federation configuration; the process must not start (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Actor key material cannot be decoded (500)
    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// Signed request could not be constructed (500)
    #[error("Signing error: {0}")]
    Signing(String),

    /// Network failure or non-2xx response from a remote inbox (502)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Inbound request failed signature verification (500)
    #[error("Signature rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Config(_) => "config",
            AppError::KeyMaterial(_) => "key_material",
            AppError::Signing(_) => "signing",
            AppError::Transport(_) => "transport",
            AppError::Rejected(rejection) => rejection.kind(),
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Rejected deliveries are reported as server errors, matching what
    /// federating peers observe from an inbox that refuses unsigned input.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Transport(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Rejected(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Config(_) | AppError::KeyMaterial(_) | AppError::Signing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind()]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
