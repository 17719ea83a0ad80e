use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use plinth_core::error::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce the `{code, message}` error
/// envelope script clients expect.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `plinth_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A registry database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { .. } => {
                    (StatusCode::NOT_FOUND, "1".to_string(), core.to_string())
                }
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "1".to_string(), msg.clone())
                }
                CoreError::MethodNotAllowed => (
                    StatusCode::METHOD_NOT_ALLOWED,
                    "1".to_string(),
                    core.to_string(),
                ),
                CoreError::PoolExhausted => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "1".to_string(),
                    core.to_string(),
                ),
                // Script-thrown errors keep the code the script chose.
                CoreError::Execution { code, message } => {
                    (StatusCode::BAD_REQUEST, code.clone(), message.clone())
                }
                CoreError::Database(msg) => {
                    tracing::error!(error = %msg, "Database error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "1".to_string(),
                        "A database error occurred".to_string(),
                    )
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "1".to_string(),
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Database errors ---
            AppError::Database(err) => classify_sqlx_error(err),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "1".to_string(), msg.clone()),
        };

        let body = json!({
            "code": code,
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a sqlx error into an HTTP status, envelope code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, String, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "1".to_string(),
            "Resource not found".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "1".to_string(),
                "A database error occurred".to_string(),
            )
        }
    }
}
