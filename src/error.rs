//! Error types for ppe-relay.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ppe-relay.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Relay startup error.
    #[error("relay startup failed: {0}")]
    Startup(String),

    /// Upstream network error.
    #[error("network error: {0}")]
    Network(String),

    /// Local event store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Payment error.
    #[error("payment error: {0}")]
    Payment(String),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Wire protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Record failed id or signature validation.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Relay is shutting down.
    #[error("relay is shutting down")]
    ShuttingDown,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Self {
        Self::Crypto(e.to_string())
    }
}
