//! Snapshot data collaborator.
//!
//! The push channel delivers *increments*; the snapshot API delivers the
//! authoritative *baseline* the session controller starts from at session
//! start and re-fetches on every lot rotation (and, while degraded, on a
//! periodic poll). [`SnapshotApi`] is the seam; [`RestSnapshotClient`] is the
//! HTTP implementation behind the `rest-snapshot` feature.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{AuctionSnapshot, LotSnapshot};

/// Read-only access to auction and lot baselines.
///
/// The session controller treats these responses as authoritative at fetch
/// time; push events then incrementally update them. Implementations should
/// map "does not exist" responses to
/// [`AuctionError::NotFound`](crate::error::AuctionError::NotFound); on the
/// initial session fetch that is a fatal error, not a retryable one.
#[async_trait]
pub trait SnapshotApi: Send + Sync + 'static {
    /// The full session baseline: auction, current lot, timer, bid history.
    async fn get_auction_snapshot(&self, auction_id: &str) -> Result<AuctionSnapshot>;

    /// A single lot's baseline, fetched on rotation.
    async fn get_lot_snapshot(&self, lot_id: &str) -> Result<LotSnapshot>;

    /// The server's view of the next legal bid amount for a lot.
    async fn get_minimum_bid(&self, lot_id: &str) -> Result<u64>;
}

#[cfg(feature = "rest-snapshot")]
pub use rest::RestSnapshotClient;

#[cfg(feature = "rest-snapshot")]
mod rest {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;

    use crate::error::{AuctionError, Result};
    use crate::protocol::{AuctionSnapshot, LotSnapshot};

    use super::SnapshotApi;

    const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct MinimumBidResponse {
        amount: u64,
    }

    /// HTTP implementation of [`SnapshotApi`].
    ///
    /// Base URL and bearer token are supplied by the host application at
    /// construction time; there is no ambient configuration.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use auction_session_client::snapshot::RestSnapshotClient;
    ///
    /// let api = RestSnapshotClient::new("https://api.example.com", Some("token".into()))?;
    /// # Ok::<(), auction_session_client::AuctionError>(())
    /// ```
    #[derive(Debug, Clone)]
    pub struct RestSnapshotClient {
        http: reqwest::Client,
        base_url: String,
        auth_token: Option<String>,
    }

    impl RestSnapshotClient {
        /// Create a client for the given base URL, with an optional bearer
        /// token attached to every request.
        ///
        /// # Errors
        ///
        /// Returns [`AuctionError::Http`] if the underlying HTTP client
        /// cannot be constructed.
        pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
            let http = reqwest::Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()?;
            Ok(Self {
                http,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                auth_token,
            })
        }

        async fn get_json<T: serde::de::DeserializeOwned>(
            &self,
            path: &str,
            not_found: impl FnOnce() -> String,
        ) -> Result<T> {
            let url = format!("{}{path}", self.base_url);
            tracing::debug!(url = %url, "fetching snapshot");

            let mut request = self.http.get(&url);
            if let Some(token) = &self.auth_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(AuctionError::NotFound { what: not_found() });
            }
            let response = response.error_for_status()?;
            Ok(response.json::<T>().await?)
        }
    }

    #[async_trait]
    impl SnapshotApi for RestSnapshotClient {
        async fn get_auction_snapshot(&self, auction_id: &str) -> Result<AuctionSnapshot> {
            self.get_json(&format!("/auctions/{auction_id}/live"), || {
                format!("auction {auction_id}")
            })
            .await
        }

        async fn get_lot_snapshot(&self, lot_id: &str) -> Result<LotSnapshot> {
            self.get_json(&format!("/lots/{lot_id}"), || format!("lot {lot_id}"))
                .await
        }

        async fn get_minimum_bid(&self, lot_id: &str) -> Result<u64> {
            let response: MinimumBidResponse = self
                .get_json(&format!("/lots/{lot_id}/minimum-bid"), || {
                    format!("lot {lot_id}")
                })
                .await?;
            Ok(response.amount)
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

        #[test]
        fn base_url_trailing_slash_is_trimmed() {
            let api = RestSnapshotClient::new("https://api.example.com/", None).unwrap();
            assert_eq!(api.base_url, "https://api.example.com");
        }

        #[tokio::test]
        async fn unreachable_host_yields_http_error() {
            // Port 1 on loopback: refused immediately, never a response.
            let api = RestSnapshotClient::new("http://127.0.0.1:1", None).unwrap();
            let err = api.get_auction_snapshot("A-1").await.unwrap_err();
            assert!(matches!(err, AuctionError::Http(_)));
        }
    }
}
