//! Shared response envelope types for API handlers.
//!
//! Successful responses use a `{"code": "0", "message": "success", "data": ...}`
//! envelope. Script results that are plain strings or byte buffers bypass the
//! envelope entirely so controllers can serve text and binary bodies.

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use plinth_core::value::ScriptValue;

/// Standard success envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: &'static str,
    pub message: &'static str,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T) -> Self {
        Envelope {
            code: "0",
            message: "success",
            data,
        }
    }
}

/// Wrap a payload in the success envelope.
pub fn success<T: Serialize>(data: T) -> Response {
    axum::Json(Envelope::success(data)).into_response()
}

/// Render a script result the way service clients expect.
///
/// Strings and byte buffers leave as raw bodies; every other kind is
/// wrapped in the JSON success envelope.
pub fn script_output(value: ScriptValue) -> Response {
    match value {
        ScriptValue::String(text) => {
            ([(CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response()
        }
        ScriptValue::Bytes(bytes) => {
            ([(CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
        }
        other => success(other),
    }
}
