//! Structured bid-rejection codes sent by the auction server.
//!
//! The server attaches these to `bidError` events as `SCREAMING_SNAKE_CASE`
//! strings (e.g. `"BID_TOO_LOW"`). Unknown future codes deserialize as
//! [`BidErrorCode::Unknown`] rather than failing the whole event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured rejection codes carried by `bidError` events.
///
/// Use [`description()`](BidErrorCode::description) for a human-readable
/// explanation suitable for direct display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidErrorCode {
    // Amount errors
    BidTooLow,
    BidIncrementViolation,

    // Lot / auction state errors
    LotNotAcceptingBids,
    LotNotFound,
    AuctionNotActive,

    // Proxy bid errors
    ProxyBidNotFound,
    ProxyBidCapExceeded,

    // Bidder errors
    Outbid,
    BidderSuspended,
    RateLimited,

    // Server errors
    InternalError,

    /// A code this client version does not recognize.
    #[serde(other)]
    Unknown,
}

impl BidErrorCode {
    /// Returns a human-readable description of this rejection code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::BidTooLow => {
                "The bid amount is below the current minimum. Raise your bid and try again."
            }
            Self::BidIncrementViolation => {
                "The bid amount does not land on a valid increment step for this price band."
            }
            Self::LotNotAcceptingBids => {
                "This lot is no longer accepting bids. It may have closed or rotated."
            }
            Self::LotNotFound => {
                "The lot could not be found. It may have been withdrawn from the auction."
            }
            Self::AuctionNotActive => {
                "The auction is not currently live. Bids are only accepted during the live session."
            }
            Self::ProxyBidNotFound => {
                "No active proxy bid was found to cancel for this lot."
            }
            Self::ProxyBidCapExceeded => {
                "The proxy bid cap has been reached; the system will not raise your bid further."
            }
            Self::Outbid => {
                "Another bidder has already placed a higher bid on this lot."
            }
            Self::BidderSuspended => {
                "Your bidding privileges are suspended. Contact support for assistance."
            }
            Self::RateLimited => {
                "Too many bids in a short time. Please slow down and try again."
            }
            Self::InternalError => {
                "An internal server error occurred while processing the bid. Please try again."
            }
            Self::Unknown => "The server reported an unrecognized bid error.",
        }
    }
}

impl fmt::Display for BidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
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
    fn serializes_screaming_snake_case() {
        let json = serde_json::to_string(&BidErrorCode::BidTooLow).unwrap();
        assert_eq!(json, r#""BID_TOO_LOW""#);
        let json = serde_json::to_string(&BidErrorCode::LotNotAcceptingBids).unwrap();
        assert_eq!(json, r#""LOT_NOT_ACCEPTING_BIDS""#);
    }

    #[test]
    fn deserializes_known_code() {
        let code: BidErrorCode = serde_json::from_str(r#""OUTBID""#).unwrap();
        assert_eq!(code, BidErrorCode::Outbid);
    }

    #[test]
    fn unknown_code_falls_back() {
        let code: BidErrorCode = serde_json::from_str(r#""SOME_FUTURE_CODE""#).unwrap();
        assert_eq!(code, BidErrorCode::Unknown);
    }

    #[test]
    fn descriptions_are_nonempty() {
        for code in [
            BidErrorCode::BidTooLow,
            BidErrorCode::LotNotAcceptingBids,
            BidErrorCode::AuctionNotActive,
            BidErrorCode::ProxyBidNotFound,
            BidErrorCode::Outbid,
            BidErrorCode::RateLimited,
            BidErrorCode::InternalError,
            BidErrorCode::Unknown,
        ] {
            assert!(!code.description().is_empty());
            assert_eq!(format!("{code}"), code.description());
        }
    }
}
