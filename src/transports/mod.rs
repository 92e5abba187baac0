//! Concrete transports for the auction push channel.
//!
//! Each transport sits behind a Cargo feature so the core crate stays free of
//! heavyweight connectivity dependencies:
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |
//!
//! A transport can also be driven directly, without the channel:
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), auction_session_client::AuctionError> {
//! use auction_session_client::transport::{Connector, Transport};
//! use auction_session_client::WebSocketConnector;
//!
//! let mut connector = WebSocketConnector::new("wss://live.example.com/ws");
//! let mut ws = connector.connect().await?;
//! ws.send(r#"{"type":"joinAuction","data":{"auctionId":"A-1"}}"#.to_string()).await?;
//!
//! if let Some(Ok(frame)) = ws.recv().await {
//!     println!("server said: {frame}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
