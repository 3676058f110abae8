//! Error types for `CryptoChat` core library.

use std::time::Duration;

use cryptochat_crypto::CryptoError;
use thiserror::Error;

/// Result type alias using `CryptoChat` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for configuration and setup.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors on a single connection, during the handshake or the chat phase.
///
/// Every variant is terminal for the connection it occurred on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed length prefix, oversized field, truncated read, bad frame layout.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Peer public key failed curve validation.
    #[error("Invalid peer key: {0}")]
    InvalidPeerKey(String),

    /// AEAD tag mismatch.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Connection refused before the handshake because the relay is full.
    #[error("Relay at capacity ({capacity} peers)")]
    CapacityExceeded { capacity: usize },

    /// Clean close or write failure on an established connection.
    #[error("Peer disconnected")]
    PeerDisconnected,

    /// The relay stopped before this connection joined.
    #[error("Relay is shutting down")]
    RelayShuttingDown,

    /// Handshake did not finish in time.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Crypto failure not covered by the variants above.
    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<CryptoError> for ProtocolError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidPeerKey(reason) => Self::InvalidPeerKey(reason),
            CryptoError::AuthenticationFailed => Self::AuthenticationFailed,
            CryptoError::MalformedFrame(reason) => Self::ProtocolViolation(reason),
            other => Self::Crypto(other),
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => Self::PeerDisconnected,
            _ => Self::Io(err),
        }
    }
}
