//! Client error types

use crate::message::MessageError;
use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Message encoding or decoding failed
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// Subscription error
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// No relay took the event
    #[error("Event publish failed: {0}")]
    PublishFailed(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
