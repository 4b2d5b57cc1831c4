//! Error types shared across the relay.

use thiserror::Error;

/// Errors raised while talking to the backend or preparing a print.
///
/// None of these are fatal to the host: every externally triggered action
/// (poll tick, print request) catches them at its own boundary.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network-level failure (connect, timeout, TLS) with a readable message.
    #[error("{message}")]
    Http {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    /// Backend answered with a non-2xx status.
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    /// Backend answered 2xx with a body we cannot use.
    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// True for failures where the backend could not be reached at all or
    /// answered with a server-side error. Used to word the outage notice.
    pub fn is_network(&self) -> bool {
        match self {
            RelayError::Http { .. } => true,
            RelayError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
