//! Transport seam between the push channel and the wire.
//!
//! [`Transport`] is a bidirectional stream of text messages; the auction
//! protocol puts one JSON envelope in each message, so framing belongs to the
//! implementation (WebSocket frames, length-prefixed TCP, an in-process pair
//! in tests). Dialing is deliberately split out into [`Connector`]: the
//! [`EventChannel`](crate::channel::EventChannel) reconnects after drops, so
//! it needs a factory that can mint a fresh connected transport per attempt,
//! not a single pre-connected instance.
//!
//! A custom transport is two small trait impls:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use auction_session_client::error::AuctionError;
//! use auction_session_client::transport::Transport;
//!
//! struct TcpLineTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for TcpLineTransport {
//!     async fn send(&mut self, message: String) -> Result<(), AuctionError> {
//!         // write one framed JSON envelope
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, AuctionError>> {
//!         // yield the next envelope, or None on clean close
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), AuctionError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::AuctionError;

/// One bidirectional text-message connection to the auction server.
///
/// A [`send`](Transport::send) carries one complete JSON envelope; a
/// [`recv`](Transport::recv) yields one.
///
/// # Cancel safety
///
/// `recv` sits in a `tokio::select!` arm inside the channel loop, so it MUST
/// be cancel-safe: a future dropped before completion must not consume a
/// message. Wrappers around `mpsc::Receiver` get this for free.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Transmit one JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::TransportSend`] when the write fails, or
    /// [`AuctionError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), AuctionError>;

    /// Yield the next JSON envelope from the server.
    ///
    /// `None` means the server closed the connection cleanly; `Some(Err(_))`
    /// is a transport fault. The channel treats both as a dropped connection
    /// and re-dials.
    ///
    /// # Cancel safety
    ///
    /// Must be cancel-safe; see the trait docs.
    async fn recv(&mut self) -> Option<Result<String, AuctionError>>;

    /// Shut the connection down.
    ///
    /// Later `send`/`recv` calls may error or yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the close handshake fails; resources are
    /// released either way.
    async fn close(&mut self) -> Result<(), AuctionError>;
}

/// Mints connected transports for the channel.
///
/// Called once per dial attempt: at startup and again on every reconnect
/// after an unexpected drop.
#[async_trait]
pub trait Connector: Send + 'static {
    /// The transport this connector produces.
    type Output: Transport;

    /// Dial a new connection.
    ///
    /// # Errors
    ///
    /// Any error from the underlying dial. The channel treats a failed
    /// attempt as retryable under its backoff schedule.
    async fn connect(&mut self) -> Result<Self::Output, AuctionError>;
}
