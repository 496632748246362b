use thiserror::Error;

use parcours_shared::{LocalMessageId, SharedError};
use parcours_store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Shared(#[from] SharedError),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("No conversation is open")]
    NoConversationOpen,

    #[error("No failed outbound message {0}")]
    NotRetryable(LocalMessageId),

    #[error("Live channel closed")]
    LiveClosed,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl ClientError {
    /// Whether the failure is a connectivity problem (timeout, refused
    /// connection, 5xx) rather than the server rejecting the request.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            ClientError::LiveClosed => true,
            _ => false,
        }
    }
}
