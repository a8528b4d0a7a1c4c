//! Error types for ExamGate
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Every failure is terminal for its request; nothing is retried.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// The auto-login variants mirror the distinct failure modes of the token
/// exchange. Token-validation failures (missing, expired, consumed,
/// IP-mismatched) are deliberately a single `InvalidToken` variant with one
/// message, so callers cannot probe which check failed.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// No authenticated session (401)
    #[error("Authentication required")]
    Unauthenticated,

    /// Caller lacks a required capability (403)
    #[error("Permission denied")]
    PermissionDenied,

    /// Administrators are not allowed to use auto-login (403)
    #[error("Auto-login is not available to administrators")]
    Forbidden,

    /// Remote web-service login is disabled site-wide (403)
    #[error("Web service login is disabled on this site")]
    FeatureDisabled,

    /// Auto-login tokens never travel over plaintext (403)
    #[error("Auto-login requires a secure (HTTPS) connection")]
    InsecureTransport,

    /// Token missing, expired, consumed or IP-mismatched (401)
    #[error("Invalid auto-login token")]
    InvalidToken,

    /// Token does not belong to the claimed user (403)
    #[error("Auto-login token does not belong to the given user")]
    TokenOwnerMismatch,

    /// Token owner no longer exists (404)
    #[error("User not found")]
    UserNotFound,

    /// Account suspended, deleted or unconfirmed (403)
    #[error("Account is not active")]
    InactiveAccount,

    /// Already logged in as a different user (409)
    #[error("Already logged in as a different user: {0}")]
    Conflict(String),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, self.to_string(), "unauthenticated")
            }
            AppError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, self.to_string(), "invalid_token")
            }
            AppError::PermissionDenied => {
                (StatusCode::FORBIDDEN, self.to_string(), "permission_denied")
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string(), "forbidden"),
            AppError::FeatureDisabled => {
                (StatusCode::FORBIDDEN, self.to_string(), "feature_disabled")
            }
            AppError::InsecureTransport => {
                (StatusCode::FORBIDDEN, self.to_string(), "insecure_transport")
            }
            AppError::TokenOwnerMismatch => {
                (StatusCode::FORBIDDEN, self.to_string(), "token_owner_mismatch")
            }
            AppError::UserNotFound => (StatusCode::NOT_FOUND, self.to_string(), "user_not_found"),
            AppError::InactiveAccount => {
                (StatusCode::FORBIDDEN, self.to_string(), "inactive_account")
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string(), "conflict"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "database",
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[error_type, "unknown"])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
