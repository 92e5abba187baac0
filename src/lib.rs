//! # Auction Session Client
//!
//! Async client for live vehicle-auction sessions: keeps a local view of the
//! lot on the block synchronized with the auction server's push events, with
//! a REST fallback when the push channel degrades.
//!
//! The crate splits into three layers:
//!
//! - **Pure logic** — [`bidding`] (minimum-bid increments), [`urgency`]
//!   (attention scoring), [`timer`] (drift-compensated countdown), and
//!   [`cache`] (TTL'd snapshot reconciliation). No I/O, unit-testable.
//! - **Connectivity** — the [`Transport`] trait over any bidirectional text
//!   transport (WebSocket built in behind `transport-websocket`), and the
//!   [`EventChannel`](channel::EventChannel), which owns reconnection with
//!   exponential backoff, topic re-subscription, and the degraded flag.
//! - **Session** — the [`SessionController`](session::SessionController)
//!   actor that serializes timer ticks, push events, and user commands into
//!   one stream of [`SessionEvent`](session::SessionEvent)s for a UI.
//!
//! ## Quick start
//!
//! ```no_run
//! use auction_session_client::channel::{ChannelConfig, EventChannel};
//! use auction_session_client::session::{SessionConfig, SessionController};
//! use auction_session_client::snapshot::RestSnapshotClient;
//! use auction_session_client::transports::websocket::WebSocketConnector;
//!
//! # async fn run() -> Result<(), auction_session_client::AuctionError> {
//! let connector = WebSocketConnector::new("wss://auctions.example.com/live");
//! let (channel, channel_rx) = EventChannel::start(connector, ChannelConfig::default());
//!
//! let api = RestSnapshotClient::new("https://auctions.example.com/api", None)?;
//! let (mut session, mut events) = SessionController::start(
//!     channel,
//!     channel_rx,
//!     api,
//!     SessionConfig::new("A-2024-0131"),
//! );
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod bidding;
pub mod cache;
pub mod channel;
pub mod error;
pub mod error_codes;
pub mod protocol;
pub mod session;
pub mod snapshot;
pub mod timer;
pub mod transport;
pub mod transports;
pub mod urgency;

// Re-export primary types for ergonomic imports.
pub use channel::{ChannelConfig, ChannelEvent, EventChannel, Topic};
pub use error::{AuctionError, Result};
pub use error_codes::BidErrorCode;
pub use protocol::{ClientCommand, ConnectionState, ServerEvent};
pub use session::{SessionConfig, SessionController, SessionEvent, SessionPhase};
pub use snapshot::SnapshotApi;
pub use transport::{Connector, Transport};
#[cfg(feature = "transport-websocket")]
pub use transports::websocket::{WebSocketConnector, WebSocketTransport};
pub use urgency::UrgencyLevel;
