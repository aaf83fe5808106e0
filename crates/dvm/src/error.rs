//! DVM error types

use nostr::{Nip01Error, Nip89Error, Nip90Error};
use nostr_client::ClientError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable reason carried by a terminal error status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    MissingInput,
    InvalidInput,
    ProcessingFailed,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MissingInput => "missing_input",
            ReasonCode::InvalidInput => "invalid_input",
            ReasonCode::ProcessingFailed => "processing_failed",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job that can never succeed as submitted. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ReasonCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn missing_input(message: impl Into<String>) -> Self {
        Self::new(ReasonCode::MissingInput, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ReasonCode::InvalidInput, message)
    }

    pub fn processing_failed(message: impl Into<String>) -> Self {
        Self::new(ReasonCode::ProcessingFailed, message)
    }

    /// Text for the third element of the `status` tag, `"<code>: <message>"`.
    pub fn status_extra(&self) -> String {
        self.to_string()
    }
}

/// DVM error type
#[derive(Debug, Error)]
pub enum DvmError {
    #[error("relay error: {0}")]
    Relay(#[from] ClientError),

    #[error("event error: {0}")]
    Event(#[from] Nip01Error),

    #[error("job protocol error: {0}")]
    Protocol(#[from] Nip90Error),

    #[error("handler announcement error: {0}")]
    Announcement(#[from] Nip89Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("no processor registered for kind {0}")]
    UnsupportedKind(u16),

    #[error("job {0} already reached a terminal state")]
    AlreadyTerminal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// DVM result type
pub type Result<T> = std::result::Result<T, DvmError>;
