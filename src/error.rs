//! Relay error taxonomy.
//!
//! Every failure the engine can report to a client is one of these variants.
//! Adapters convert their I/O errors at the boundary; nothing below the
//! registry is allowed to panic on a transport failure.

use serde::Serialize;
use thiserror::Error;

/// Relay errors surfaced to clients as `error` notices.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Host/port unreachable or serial device could not be opened
    #[error("{0}")]
    Connect(String),

    /// Underlying transport write failed
    #[error("{0}")]
    Write(String),

    /// No transport of the required kind is open for the session
    #[error("{0}")]
    NotConnected(String),

    /// Malformed inbound client message
    #[error("{0}")]
    Protocol(String),

    /// Pseudo-file read target does not exist
    #[error("File does not exist: {0}")]
    NotFound(String),

    /// A script is already active for the session
    #[error("A script is already running")]
    AlreadyRunning,

    /// The session or transport went away while a request was in flight
    #[error("{0}")]
    ConnectionClosed(String),

    /// Request was well-formed JSON but is missing a required value
    #[error("{0}")]
    InvalidRequest(String),

    /// A stored script could not be resolved
    #[error("Script error: {0}")]
    Script(String),
}

/// Stable machine-readable code carried on every `error` notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Connect,
    Write,
    NotConnected,
    Protocol,
    NotFound,
    AlreadyRunning,
    ConnectionClosed,
    InvalidRequest,
    Script,
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Connect(_) => ErrorCode::Connect,
            RelayError::Write(_) => ErrorCode::Write,
            RelayError::NotConnected(_) => ErrorCode::NotConnected,
            RelayError::Protocol(_) => ErrorCode::Protocol,
            RelayError::NotFound(_) => ErrorCode::NotFound,
            RelayError::AlreadyRunning => ErrorCode::AlreadyRunning,
            RelayError::ConnectionClosed(_) => ErrorCode::ConnectionClosed,
            RelayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RelayError::Script(_) => ErrorCode::Script,
        }
    }

    pub(crate) fn telnet_not_open() -> Self {
        RelayError::NotConnected("Telnet connection is not open".to_string())
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Script(err.to_string())
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
