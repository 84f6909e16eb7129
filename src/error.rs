//! Error types for wirebus.

use thiserror::Error;

/// Main error type for all wirebus operations.
#[derive(Debug, Error)]
pub enum WirebusError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload serialization error.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Payload deserialization error.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Protocol error (corrupt frame header, oversized payload, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An endpoint URI that could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Argument precondition failure at a call site.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No decoder registered for the given message type id.
    #[error("no decoder registered for message type {0}")]
    UnknownMessageType(u16),

    /// The endpoint is already bound by this component.
    #[error("endpoint is already bound")]
    AlreadyBound,

    /// The component already holds a live connection.
    #[error("already connected")]
    AlreadyConnected,

    /// The operation requires a live connection.
    #[error("not connected")]
    NotConnected,

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias using WirebusError.
pub type Result<T> = std::result::Result<T, WirebusError>;
