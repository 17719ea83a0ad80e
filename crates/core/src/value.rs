//! Tagged value model for everything that crosses the script boundary.
//!
//! Host code never passes engine-native handles around; every argument,
//! result, row cell, pipe element, and thrown error is one of the explicit
//! kinds below. Object keys keep insertion order so query results and JSON
//! round-trips stay stable.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::error::CoreError;

/// A value produced or consumed by a script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<ScriptValue>),
    Object(IndexMap<String, ScriptValue>),
    /// Raw bytes. Serialized as an array of numbers, matching the script
    /// view of a buffer as a number array.
    Bytes(Vec<u8>),
}

impl ScriptValue {
    /// Convert to a `serde_json::Value`, one case per kind.
    ///
    /// Non-finite floats have no JSON representation and become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ScriptValue::Null => serde_json::Value::Null,
            ScriptValue::Bool(b) => serde_json::Value::Bool(*b),
            ScriptValue::Int(i) => serde_json::Value::Number((*i).into()),
            ScriptValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ScriptValue::String(s) => serde_json::Value::String(s.clone()),
            ScriptValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(ScriptValue::to_json).collect())
            }
            ScriptValue::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ScriptValue::Bytes(bytes) => {
                serde_json::Value::Array(bytes.iter().map(|b| (*b).into()).collect())
            }
        }
    }

    /// Convert from a `serde_json::Value`.
    ///
    /// Whole numbers become `Int`, everything else numeric becomes `Float`.
    /// JSON arrays always become `Array` (never `Bytes`).
    pub fn from_json(value: serde_json::Value) -> ScriptValue {
        match value {
            serde_json::Value::Null => ScriptValue::Null,
            serde_json::Value::Bool(b) => ScriptValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ScriptValue::Int(i)
                } else {
                    ScriptValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => ScriptValue::String(s),
            serde_json::Value::Array(items) => {
                ScriptValue::Array(items.into_iter().map(ScriptValue::from_json).collect())
            }
            serde_json::Value::Object(map) => ScriptValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ScriptValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render for log output and string interpolation: strings are raw,
    /// scalars use their display form, composites use compact JSON.
    pub fn render(&self) -> String {
        match self {
            ScriptValue::Null => "null".to_string(),
            ScriptValue::Bool(b) => b.to_string(),
            ScriptValue::Int(i) => i.to_string(),
            ScriptValue::Float(f) => f.to_string(),
            ScriptValue::String(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Float(_) => "float",
            ScriptValue::String(_) => "string",
            ScriptValue::Array(_) => "array",
            ScriptValue::Object(_) => "object",
            ScriptValue::Bytes(_) => "bytes",
        }
    }
}

impl Serialize for ScriptValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Structured script errors
// ---------------------------------------------------------------------------

/// An error raised inside a script.
///
/// Thrown objects may carry `code` and `message` fields which flow through
/// to the response envelope; any other thrown value becomes the message.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub code: Option<String>,
    pub message: String,
}

impl ScriptError {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Interpret a thrown script value as a structured error.
    pub fn from_thrown(value: ScriptValue) -> Self {
        if let ScriptValue::Object(map) = &value {
            let code = map.get("code").map(ScriptValue::render);
            if let Some(message) = map.get("message") {
                return Self {
                    code,
                    message: message.render(),
                };
            }
            if code.is_some() {
                return Self {
                    code,
                    message: value.render(),
                };
            }
        }
        Self {
            code: None,
            message: value.render(),
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ScriptError> for CoreError {
    fn from(err: ScriptError) -> Self {
        CoreError::execution(err.code, err.message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
