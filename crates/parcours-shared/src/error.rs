use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Validation error on '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SharedError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
