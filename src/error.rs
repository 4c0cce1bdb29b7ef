//! Error types for the relay.
//!
//! Every variant is reportable to the client as an `error` event; none of them
//! is allowed to take down the connection task that produced it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Provider credentials or endpoint missing/invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider transport failure (connect, read or socket error)
    #[error("Provider connection error: {0}")]
    Connection(String),

    /// Provider sent a message we could not decode
    #[error("Provider protocol error: {0}")]
    Protocol(String),

    /// Client sent audio/stop before start
    #[error("Session not initialized. Call start first.")]
    NotStarted,

    /// Writing an audio chunk to an open provider link failed
    #[error("Failed to forward audio: {0}")]
    Forwarding(String),
}

impl RelayError {
    /// Short machine-readable code sent alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Configuration(_) => "CONFIGURATION_ERROR",
            RelayError::Connection(_) => "CONNECTION_ERROR",
            RelayError::Protocol(_) => "PROTOCOL_ERROR",
            RelayError::NotStarted => "NOT_STARTED",
            RelayError::Forwarding(_) => "FORWARDING_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
