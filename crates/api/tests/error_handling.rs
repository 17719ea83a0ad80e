//! Tests for `AppError` → HTTP response mapping.
//!
//! These tests verify that each `AppError` variant produces the correct
//! HTTP status code and `{code, message}` envelope. They do NOT need an
//! HTTP server -- they call `IntoResponse` directly on `AppError` values.

use axum::response::IntoResponse;
use http_body_util::BodyExt;

use plinth_api::error::AppError;
use plinth_core::error::CoreError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (axum::http::StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

// ---------------------------------------------------------------------------
// Test: CoreError::NotFound maps to 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "route",
        name: "/missing".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "1");
    assert_eq!(json["message"], "route not found: /missing");
}

// ---------------------------------------------------------------------------
// Test: CoreError::Validation maps to 400 with the bare message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_error_returns_400() {
    let err = AppError::Core(CoreError::Validation("name is required".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "1");
    // The envelope carries the message without the display prefix.
    assert_eq!(json["message"], "name is required");
}

// ---------------------------------------------------------------------------
// Test: CoreError::MethodNotAllowed maps to 405
// ---------------------------------------------------------------------------

#[tokio::test]
async fn method_not_allowed_returns_405() {
    let err = AppError::Core(CoreError::MethodNotAllowed);

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json["code"], "1");
    assert_eq!(json["message"], "Method not allowed");
}

// ---------------------------------------------------------------------------
// Test: CoreError::PoolExhausted maps to 503
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pool_exhausted_returns_503() {
    let err = AppError::Core(CoreError::PoolExhausted);

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "1");
    assert_eq!(json["message"], "No idle worker available");
}

// ---------------------------------------------------------------------------
// Test: CoreError::Execution keeps the script's own code
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_error_keeps_the_script_code() {
    let err = AppError::Core(CoreError::Execution {
        code: "E42".into(),
        message: "not yours".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "E42");
    assert_eq!(json["message"], "not yours");
}

// ---------------------------------------------------------------------------
// Test: CoreError::Internal maps to 500 and sanitizes the message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes() {
    let err = AppError::Core(CoreError::Internal("secret connection string".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "1");

    let body_text = json.to_string();
    assert!(
        !body_text.contains("secret"),
        "Internal error response must not leak details"
    );
    assert_eq!(json["message"], "An internal error occurred");
}

// ---------------------------------------------------------------------------
// Test: CoreError::Database maps to 500 and sanitizes the message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn core_database_error_returns_500_and_sanitizes() {
    let err = AppError::Core(CoreError::Database("disk I/O error at page 7".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "1");
    assert_eq!(json["message"], "A database error occurred");
}

// ---------------------------------------------------------------------------
// Test: sqlx RowNotFound maps to 404, other sqlx errors to 500
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sqlx_row_not_found_returns_404() {
    let err = AppError::Database(sqlx::Error::RowNotFound);

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "1");
    assert_eq!(json["message"], "Resource not found");
}

#[tokio::test]
async fn other_sqlx_errors_return_500() {
    let err = AppError::Database(sqlx::Error::PoolClosed);

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["message"], "A database error occurred");
}

// ---------------------------------------------------------------------------
// Test: AppError::BadRequest maps to 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_request_error_returns_400() {
    let err = AppError::BadRequest("script body must be valid UTF-8".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "1");
    assert_eq!(json["message"], "script body must be valid UTF-8");
}
