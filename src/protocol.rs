//! Wire-compatible protocol types for the live auction push protocol.
//!
//! Every type in this module produces the JSON the auction server speaks on
//! its push channel: tagged `{"type": ..., "data": ...}` envelopes with
//! camelCase field names. Timestamps are `chrono::DateTime<Utc>` (ISO 8601 on
//! the wire), identifiers are server-issued opaque strings for auctions and
//! lots and UUIDs for bids and bidders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_codes::BidErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for auctions (server-issued, e.g. `"A-2024-0131"`).
pub type AuctionId = String;

/// Unique identifier for lots (server-issued, e.g. `"L1"`).
pub type LotId = String;

/// Unique identifier for individual bids.
pub type BidId = Uuid;

/// Unique identifier for bidders.
pub type BidderId = Uuid;

// ── Enums ───────────────────────────────────────────────────────────

/// The kind of bid being placed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BidKind {
    /// A bid placed while the lot is actively open and timed.
    #[default]
    Live,
    /// A bid placed before live bidding opens for a lot.
    PreBid,
    /// A standing maximum bid the server raises automatically up to a cap.
    Proxy,
}

/// Push-channel connection state.
///
/// Single authoritative instance per session, owned by the
/// [`EventChannel`](crate::channel::EventChannel).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// Initial connection attempt in progress.
    Connecting,
    /// Connected and receiving events.
    Connected,
    /// Connection dropped; retrying with backoff.
    Reconnecting,
}

// ── Structs ─────────────────────────────────────────────────────────

/// A single bid on a lot. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: BidId,
    pub lot_id: LotId,
    pub bidder_id: BidderId,
    pub bidder_name: String,
    pub amount: u64,
    pub placed_at: DateTime<Utc>,
    /// Whether this bid is currently the highest on its lot.
    /// Recomputed locally after every insert so exactly one bid carries it.
    #[serde(default)]
    pub is_highest: bool,
}

/// The vehicle lot currently up for bid. Read-mostly; refreshed on rotation
/// and mutated only by applied events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub lot_id: LotId,
    /// Display ordinal within the auction (e.g. lot 17 of 140).
    pub lot_number: u32,
    pub current_price: u64,
    pub bid_count: u32,
    /// Minimum acceptable sale price, if the seller set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_price: Option<u64>,
    pub is_reserve_met: bool,
    /// Floor for pre-bids; the next legal bid is never below this.
    pub min_pre_bid: u64,
}

/// Lightweight summary of the current highest bid, carried by
/// `highestBidUpdated` events that omit the full bid record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighestBidSummary {
    pub amount: u64,
    pub bidder_id: BidderId,
    pub bidder_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placed_at: Option<DateTime<Utc>>,
}

/// Aggregate bid statistics for a lot, pushed by `bidStatsUpdated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidStats {
    pub bid_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_reserve_met: Option<bool>,
}

/// Top-level auction metadata returned by the snapshot API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auction {
    pub auction_id: AuctionId,
    pub title: String,
    pub current_lot_id: LotId,
    pub lot_count: u32,
}

/// Static vehicle details attached to a lot snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotDetails {
    pub make: String,
    pub model: String,
    pub year: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

// ── Snapshot payloads ───────────────────────────────────────────────

/// Authoritative baseline fetched at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSnapshot {
    pub auction: Auction,
    pub current_lot: Lot,
    pub timer_seconds: u32,
    /// Most-recent-first bid history for the current lot.
    #[serde(default)]
    pub bid_history: Vec<Bid>,
}

/// Per-lot baseline fetched on every lot rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSnapshot {
    pub lot: Lot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<LotDetails>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Command types sent from client to server over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Subscribe to auction-wide events (rotation, session lifecycle).
    JoinAuction {
        #[serde(rename = "auctionId")]
        auction_id: AuctionId,
    },
    /// Subscribe to a lot's bid and timer events.
    JoinLot {
        #[serde(rename = "lotId")]
        lot_id: LotId,
    },
    /// Unsubscribe from a lot's events.
    LeaveLot {
        #[serde(rename = "lotId")]
        lot_id: LotId,
    },
    /// Place a bid on a lot.
    PlaceBid {
        #[serde(rename = "lotId")]
        lot_id: LotId,
        kind: BidKind,
        amount: u64,
    },
    /// Cancel a standing proxy bid on a lot.
    CancelProxyBid {
        #[serde(rename = "lotId")]
        lot_id: LotId,
    },
}

/// Event types pushed from server to client.
///
/// Every lot-scoped event carries a `lotId`; the session controller applies
/// it only when it matches the current lot (`session.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A bid was accepted on a lot.
    NewBid { bid: Bid },
    /// The lot countdown was reset to an authoritative value.
    TimerReset {
        #[serde(rename = "lotId")]
        lot_id: LotId,
        #[serde(rename = "newSeconds")]
        new_seconds: u32,
    },
    /// The auction rotated to the next lot.
    MoveToNextLot {
        #[serde(rename = "previousLotId")]
        previous_lot_id: LotId,
        #[serde(rename = "nextLotId")]
        next_lot_id: LotId,
        #[serde(rename = "nextLotNumber")]
        next_lot_number: u32,
    },
    /// Lightweight highest-bid aggregate (no full bid record).
    HighestBidUpdated {
        #[serde(rename = "lotId")]
        lot_id: LotId,
        #[serde(rename = "highestBid")]
        highest_bid: HighestBidSummary,
    },
    /// Aggregate bid statistics changed.
    BidStatsUpdated {
        #[serde(rename = "lotId")]
        lot_id: LotId,
        stats: BidStats,
    },
    /// Server-observed connection state change (e.g. session being migrated).
    ConnectionStateChanged {
        state: ConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A bid was rejected.
    BidError {
        #[serde(rename = "lotId")]
        lot_id: LotId,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<BidErrorCode>,
    },
}

impl ServerEvent {
    /// The lot this event is scoped to, for guard logging.
    ///
    /// `MoveToNextLot` returns the *previous* lot (the one it is scoped to
    /// leaving); `ConnectionStateChanged` is session-wide and returns `None`.
    pub fn lot_id(&self) -> Option<&str> {
        match self {
            Self::NewBid { bid } => Some(&bid.lot_id),
            Self::TimerReset { lot_id, .. }
            | Self::HighestBidUpdated { lot_id, .. }
            | Self::BidStatsUpdated { lot_id, .. }
            | Self::BidError { lot_id, .. } => Some(lot_id),
            Self::MoveToNextLot {
                previous_lot_id, ..
            } => Some(previous_lot_id),
            Self::ConnectionStateChanged { .. } => None,
        }
    }
}
