#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {name}")]
    NotFound { entity: &'static str, name: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("No idle worker available")]
    PoolExhausted,

    #[error("{message}")]
    Execution { code: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build an execution error from a script-thrown value, applying the
    /// wire defaults: code falls back to `"1"`, message to the raw error text.
    pub fn execution(code: Option<String>, message: impl Into<String>) -> Self {
        CoreError::Execution {
            code: code.unwrap_or_else(|| "1".to_string()),
            message: message.into(),
        }
    }
}
