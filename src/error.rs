//! Error types for the auction session client.
//!
//! Bid rejections are not errors: the server reports them as events, and the
//! session surfaces them as
//! [`SessionEvent::BidRejected`](crate::session::SessionEvent::BidRejected).

use thiserror::Error;

/// Errors that can occur when using the auction session client.
#[derive(Debug, Error)]
pub enum AuctionError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Attempted an operation that requires an active connection, but the
    /// channel is not connected and has exhausted its reconnect budget.
    #[error("not connected to server")]
    NotConnected,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A requested auction or lot does not exist.
    ///
    /// On the initial snapshot fetch this is fatal: the session transitions to
    /// `Closed` without retrying.
    #[error("{what} not found")]
    NotFound {
        /// What was looked up (e.g. `"auction 4812"`, `"lot L1"`).
        what: String,
    },

    /// The session has already been closed; no further commands are accepted.
    #[error("session closed")]
    SessionClosed,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An HTTP error occurred while talking to the snapshot API.
    #[cfg(feature = "rest-snapshot")]
    #[error("snapshot API error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized [`Result`] type for auction session client operations.
pub type Result<T> = std::result::Result<T, AuctionError>;
