//! Error types for the connector.

use thiserror::Error;
use weft_protocol::ProtocolError;

/// Result type for connector operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors surfaced by the connector and its transport.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// An operation requires `connect()` to have been called first.
    #[error("connection not initialized: {0}")]
    NotInitialized(&'static str),

    /// The connection could not be established with the given configuration.
    #[error("connection configuration error: {0}")]
    Config(String),

    /// The connection failed permanently; retrying is pointless.
    ///
    /// Raised once the transport has exhausted its connection attempts.
    /// The monitor task terminates on this variant.
    #[error("connection failed: {0}")]
    Fatal(String),

    /// A transient transport failure; the monitor retries these.
    #[error("connection processing failure: {0}")]
    Processing(String),

    /// A wire-format error while building an outbound message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// Create a transient processing error.
    pub fn processing(reason: impl Into<String>) -> Self {
        Self::Processing(reason.into())
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Create a fatal error.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }
}
