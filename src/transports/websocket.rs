//! WebSocket transport backed by `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries the auction wire protocol (one JSON envelope
//! per text frame) over a WebSocket connection. [`WebSocketConnector`] is the
//! [`Connector`] the [`EventChannel`](crate::channel::EventChannel) uses to
//! dial it, once at startup and again on every reconnect attempt. Both `ws://`
//! and `wss://` URLs work; TLS is negotiated through
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! Available when the `transport-websocket` feature is enabled (the default).

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};

use crate::error::AuctionError;
use crate::transport::{Connector, Transport};

/// The stream type produced by [`tokio_tungstenite::connect_async`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Dial failures keep the underlying I/O [`ErrorKind`](io::ErrorKind) where
/// one exists so callers can tell a refused connection from a DNS failure.
fn dial_error(e: WsError) -> AuctionError {
    let kind = match &e {
        WsError::Io(io_err) => io_err.kind(),
        _ => io::ErrorKind::Other,
    };
    AuctionError::Io(io::Error::new(kind, e))
}

/// A [`Transport`] over a live WebSocket connection to the auction server.
///
/// # Cancel safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future mid-await
/// loses no frames, so it can sit in a `tokio::select!` arm.
#[derive(Debug)]
pub struct WebSocketTransport {
    inner: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Dial the auction push endpoint at `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::Io`] when the URL is invalid or the handshake
    /// fails.
    pub async fn connect(url: &str) -> Result<Self, AuctionError> {
        debug!(url = %url, "dialing auction push endpoint");
        let (inner, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(dial_error)?;
        info!(url = %url, "auction push connection established");
        Ok(Self {
            inner,
            closed: false,
        })
    }

    /// Wrap an already-established stream, for callers that need custom TLS
    /// configuration or handshake headers [`connect`](Self::connect) does not
    /// expose.
    pub fn from_stream(inner: WsStream) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    /// [`connect`](Self::connect) bounded by a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::Timeout`] when the deadline elapses, otherwise
    /// whatever `connect` returns.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, AuctionError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| AuctionError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), AuctionError> {
        if self.closed {
            return Err(AuctionError::TransportClosed);
        }
        self.inner
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| AuctionError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, AuctionError>> {
        // Control frames never surface to the channel; loop until a text
        // frame, an error, or end of stream.
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed the push connection");
                    return None;
                }
                // tungstenite queues the pong reply itself.
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Binary(_)) => {
                    warn!("unexpected binary frame on the push connection, skipping");
                }
                // Not produced by the read half; exhaustiveness only.
                Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(AuctionError::TransportReceive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), AuctionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner
            .close(None)
            .await
            .map_err(|e| AuctionError::TransportSend(e.to_string()))
    }
}

/// Dials a fixed WebSocket URL on every [`connect`](Connector::connect) call.
///
/// A fresh transport per dial is what lets the
/// [`EventChannel`](crate::channel::EventChannel) reconnect after a drop
/// without the caller's involvement.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Default per-attempt dial timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a connector for the given `ws://` or `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the per-attempt dial timeout (default 10 seconds).
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Output = WebSocketTransport;

    async fn connect(&mut self) -> Result<WebSocketTransport, AuctionError> {
        WebSocketTransport::connect_with_timeout(&self.url, self.connect_timeout).await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A local WebSocket server driving one accepted connection through
    /// `handler`; returns the URL to dial.
    async fn local_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });
        format!("ws://{addr}")
    }

    fn timer_frame(lot: &str, seconds: u32) -> String {
        format!(r#"{{"type":"timerReset","data":{{"lotId":"{lot}","newSeconds":{seconds}}}}}"#)
    }

    #[test]
    fn transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn invalid_url_is_an_io_error() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Io(_)));
    }

    #[tokio::test]
    async fn refused_dial_is_an_io_error() {
        // Port 1 on loopback: refused immediately, never a response.
        let err = WebSocketTransport::connect("ws://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Io(_)));
    }

    #[tokio::test]
    async fn dial_timeout_maps_to_timeout_error() {
        // TEST-NET-1 is non-routable, so the dial hangs until the deadline.
        let err = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuctionError::Timeout));
    }

    #[tokio::test]
    async fn text_frames_arrive_in_order() {
        let first = timer_frame("L1", 45);
        let second = timer_frame("L1", 30);
        let (a, b) = (first.clone(), second.clone());
        let url = local_server(|mut ws| async move {
            ws.send(Message::Text(a.into())).await.unwrap();
            ws.send(Message::Text(b.into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), first);
        assert_eq!(transport.recv().await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn server_close_frame_ends_the_stream() {
        let url = local_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let frame = timer_frame("L2", 10);
        let expected = frame.clone();
        let url = local_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(frame.into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), expected);
    }

    #[tokio::test]
    async fn commands_echo_back_through_the_server() {
        let url = local_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let command = r#"{"type":"joinLot","data":{"lotId":"L9"}}"#;
        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.send(command.to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), command);
    }

    #[tokio::test]
    async fn send_after_close_reports_closed_transport() {
        let url = local_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        // Close again to check idempotence before the failed send.
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, AuctionError::TransportClosed));
    }

    #[tokio::test]
    async fn recv_after_close_does_not_hang() {
        let url = local_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        match transport.recv().await {
            None | Some(Err(_)) => {}
            Some(Ok(msg)) => panic!("expected end of stream after close, got Ok({msg:?})"),
        }
    }

    #[tokio::test]
    async fn connector_produces_a_working_transport() {
        let frame = timer_frame("L1", 60);
        let expected = frame.clone();
        let url = local_server(|mut ws| async move {
            ws.send(Message::Text(frame.into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut connector =
            WebSocketConnector::new(url).with_connect_timeout(Duration::from_secs(2));
        let mut transport = Connector::connect(&mut connector).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), expected);
    }
}
