//! Hand-off of a rendered receipt to the printer app.
//!
//! There is no socket or USB access: the receipt is percent-encoded into an
//! `intent:` URI and opened through the OS, where the registered printer app
//! picks it up. The hand-off is fire-and-forget; the only observable failure
//! is the open call itself failing.

use std::sync::Mutex;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to open printer intent: {0}")]
    Open(String),

    #[error("Refusing to send an empty receipt")]
    Empty,
}

/// Anything that can take a fully rendered receipt off our hands.
pub trait PrintTransport: Send + Sync {
    fn send(&self, receipt: &str) -> Result<(), TransportError>;
}

/// Percent-encode every byte outside the RFC 3986 unreserved set.
pub fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

/// `intent:<encoded>#Intent;scheme=<scheme>;package=<package>;end`
pub fn build_intent_uri(receipt: &str, scheme: &str, package: &str) -> String {
    format!(
        "intent:{}#Intent;scheme={scheme};package={package};end",
        percent_encode(receipt)
    )
}

/// Opens the intent URI with the platform URL handler.
#[derive(Debug, Clone)]
pub struct IntentUriTransport {
    scheme: String,
    package: String,
}

impl IntentUriTransport {
    pub fn new(scheme: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            package: package.into(),
        }
    }
}

impl PrintTransport for IntentUriTransport {
    fn send(&self, receipt: &str) -> Result<(), TransportError> {
        if receipt.is_empty() {
            return Err(TransportError::Empty);
        }
        let uri = build_intent_uri(receipt, &self.scheme, &self.package);
        webbrowser::open(&uri).map_err(|e| TransportError::Open(e.to_string()))?;
        info!(
            scheme = %self.scheme,
            package = %self.package,
            uri_len = uri.len(),
            "Handed receipt to printer app"
        );
        Ok(())
    }
}

/// Keeps every receipt in memory instead of printing. Used for dry runs
/// and tests.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `send` fail with `message` (or succeed on `None`).
    pub fn set_failure(&self, message: Option<&str>) {
        *self
            .fail_with
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = message.map(str::to_string);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl PrintTransport for RecordingTransport {
    fn send(&self, receipt: &str) -> Result<(), TransportError> {
        if receipt.is_empty() {
            return Err(TransportError::Empty);
        }
        if let Some(message) = self
            .fail_with
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
        {
            return Err(TransportError::Open(message));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(receipt.to_string());
        Ok(())
    }
}
