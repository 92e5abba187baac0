#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for integration tests.
//!
//! Provides a channel-based [`MockTransport`] driven by a [`ServerHandle`],
//! a scripted [`MockConnector`] for exercising reconnection, an in-memory
//! [`MockSnapshotApi`], and helpers for common server event JSON.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use auction_session_client::protocol::{
    Auction, AuctionSnapshot, Bid, BidStats, HighestBidSummary, Lot, LotSnapshot, ServerEvent,
};
use auction_session_client::snapshot::SnapshotApi;
use auction_session_client::{AuctionError, BidErrorCode, Connector, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// One scripted item for the transport's receive side.
///
/// `Some(Ok(json))` delivers a frame, `Some(Err(e))` delivers a receive
/// error, `None` closes the connection.
pub type Frame = Option<Result<String, AuctionError>>;

/// A channel-driven mock transport.
///
/// Frames arrive through the paired [`ServerHandle`]; everything the client
/// sends is recorded in `sent`.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), AuctionError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, AuctionError>> {
        match self.incoming.recv().await {
            Some(frame) => frame,
            // Script exhausted with the handle dropped: hang so the
            // connection stays up until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), AuctionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Test-side driver for a [`MockTransport`].
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Frame>,
}

impl ServerHandle {
    /// Push a typed server event to the client.
    pub fn send_event(&self, event: &ServerEvent) {
        let json = serde_json::to_string(event).expect("server event serialization");
        self.send_raw(json);
    }

    /// Push a raw frame to the client.
    pub fn send_raw(&self, json: String) {
        self.tx.send(Some(Ok(json))).expect("transport receiver alive");
    }

    /// Close the connection from the server side.
    pub fn drop_connection(&self) {
        let _ = self.tx.send(None);
    }
}

// ── MockConnector ───────────────────────────────────────────────────

enum DialOutcome {
    Fail(String),
    Ok(MockTransport),
}

/// A connector whose dial outcomes are scripted in order.
///
/// Every successful dial hands out a [`MockTransport`]; the matching
/// [`ServerHandle`]s are returned up front so tests can drive each
/// connection. Dialing past the script fails.
pub struct MockConnector {
    outcomes: VecDeque<DialOutcome>,
    dials: Arc<AtomicUsize>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnector {
    /// A connector with one successful connection.
    pub fn single() -> (Self, ServerHandle) {
        let (connector, mut servers) = Self::script(&[true]);
        let server = servers.remove(0);
        (connector, server)
    }

    /// A connector whose every dial fails.
    pub fn always_failing() -> Self {
        Self {
            outcomes: VecDeque::new(),
            dials: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A connector scripted from dial outcomes: `true` succeeds, `false`
    /// fails. Returns a [`ServerHandle`] per successful dial, in order.
    pub fn script(outcomes: &[bool]) -> (Self, Vec<ServerHandle>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let mut scripted = VecDeque::new();
        let mut servers = Vec::new();

        for &ok in outcomes {
            if ok {
                let (tx, rx) = mpsc::unbounded_channel();
                servers.push(ServerHandle { tx });
                scripted.push_back(DialOutcome::Ok(MockTransport {
                    incoming: rx,
                    sent: Arc::clone(&sent),
                    closed: Arc::clone(&closed),
                }));
            } else {
                scripted.push_back(DialOutcome::Fail("scripted dial failure".to_string()));
            }
        }

        (
            Self {
                outcomes: scripted,
                dials: Arc::new(AtomicUsize::new(0)),
                sent,
                closed,
            },
            servers,
        )
    }

    /// Shared log of every frame sent over any of this connector's
    /// transports.
    pub fn sent_log(&self) -> Arc<StdMutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }

    /// Shared dial counter.
    pub fn dial_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.dials)
    }

    /// Shared flag set when any transport is closed.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Output = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport, AuctionError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.pop_front() {
            Some(DialOutcome::Ok(transport)) => Ok(transport),
            Some(DialOutcome::Fail(reason)) => Err(AuctionError::TransportReceive(reason)),
            None => Err(AuctionError::TransportReceive(
                "dial script exhausted".to_string(),
            )),
        }
    }
}

// ── MockSnapshotApi ─────────────────────────────────────────────────

/// In-memory snapshot API with per-method call counters and optional
/// failure injection.
#[derive(Clone)]
pub struct MockSnapshotApi {
    auction: Arc<StdMutex<Option<AuctionSnapshot>>>,
    lots: Arc<StdMutex<HashMap<String, LotSnapshot>>>,
    pub auction_calls: Arc<AtomicUsize>,
    pub lot_calls: Arc<AtomicUsize>,
    fail_lots: Arc<AtomicBool>,
}

impl MockSnapshotApi {
    pub fn new() -> Self {
        Self {
            auction: Arc::new(StdMutex::new(None)),
            lots: Arc::new(StdMutex::new(HashMap::new())),
            auction_calls: Arc::new(AtomicUsize::new(0)),
            lot_calls: Arc::new(AtomicUsize::new(0)),
            fail_lots: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_auction(self, snapshot: AuctionSnapshot) -> Self {
        *self.auction.lock().unwrap() = Some(snapshot);
        self
    }

    pub fn with_lot(self, snapshot: LotSnapshot) -> Self {
        self.lots
            .lock()
            .unwrap()
            .insert(snapshot.lot.lot_id.clone(), snapshot);
        self
    }

    /// Register a lot snapshot after construction.
    pub fn add_lot(&self, snapshot: LotSnapshot) {
        self.lots
            .lock()
            .unwrap()
            .insert(snapshot.lot.lot_id.clone(), snapshot);
    }

    /// Make subsequent `get_lot_snapshot` calls fail.
    pub fn fail_lot_fetches(&self, fail: bool) {
        self.fail_lots.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotApi for MockSnapshotApi {
    async fn get_auction_snapshot(&self, auction_id: &str) -> Result<AuctionSnapshot, AuctionError> {
        self.auction_calls.fetch_add(1, Ordering::SeqCst);
        self.auction
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AuctionError::NotFound {
                what: format!("auction {auction_id}"),
            })
    }

    async fn get_lot_snapshot(&self, lot_id: &str) -> Result<LotSnapshot, AuctionError> {
        self.lot_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lots.load(Ordering::SeqCst) {
            return Err(AuctionError::TransportReceive(
                "scripted lot fetch failure".to_string(),
            ));
        }
        self.lots
            .lock()
            .unwrap()
            .get(lot_id)
            .cloned()
            .ok_or_else(|| AuctionError::NotFound {
                what: format!("lot {lot_id}"),
            })
    }

    async fn get_minimum_bid(&self, lot_id: &str) -> Result<u64, AuctionError> {
        let snapshot = self.get_lot_snapshot(lot_id).await?;
        Ok(auction_session_client::bidding::next_minimum(
            snapshot.lot.current_price,
            snapshot.lot.min_pre_bid,
        ))
    }
}

// ── Fixture builders ────────────────────────────────────────────────

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn lot(lot_id: &str, lot_number: u32, current_price: u64) -> Lot {
    Lot {
        lot_id: lot_id.to_string(),
        lot_number,
        current_price,
        bid_count: 0,
        reserve_price: None,
        is_reserve_met: false,
        min_pre_bid: 0,
    }
}

pub fn bid(lot_id: &str, amount: u64, placed_at_secs: i64) -> Bid {
    Bid {
        id: Uuid::new_v4(),
        lot_id: lot_id.to_string(),
        bidder_id: Uuid::new_v4(),
        bidder_name: "bidder".to_string(),
        amount,
        placed_at: ts(placed_at_secs),
        is_highest: false,
    }
}

pub fn auction_snapshot(auction_id: &str, current_lot: Lot, timer_seconds: u32) -> AuctionSnapshot {
    AuctionSnapshot {
        auction: Auction {
            auction_id: auction_id.to_string(),
            title: "Test Auction".to_string(),
            current_lot_id: current_lot.lot_id.clone(),
            lot_count: 140,
        },
        current_lot,
        timer_seconds,
        bid_history: vec![],
    }
}

pub fn lot_snapshot(lot: Lot) -> LotSnapshot {
    LotSnapshot { lot, details: None }
}

// ── Server event helpers ────────────────────────────────────────────

pub fn new_bid_event(lot_id: &str, amount: u64, placed_at_secs: i64) -> ServerEvent {
    ServerEvent::NewBid {
        bid: bid(lot_id, amount, placed_at_secs),
    }
}

pub fn timer_reset_event(lot_id: &str, new_seconds: u32) -> ServerEvent {
    ServerEvent::TimerReset {
        lot_id: lot_id.to_string(),
        new_seconds,
    }
}

pub fn move_to_next_lot_event(previous: &str, next: &str, next_number: u32) -> ServerEvent {
    ServerEvent::MoveToNextLot {
        previous_lot_id: previous.to_string(),
        next_lot_id: next.to_string(),
        next_lot_number: next_number,
    }
}

pub fn highest_bid_updated_event(lot_id: &str, amount: u64) -> ServerEvent {
    ServerEvent::HighestBidUpdated {
        lot_id: lot_id.to_string(),
        highest_bid: HighestBidSummary {
            amount,
            bidder_id: Uuid::new_v4(),
            bidder_name: "bidder".to_string(),
            placed_at: Some(ts(0)),
        },
    }
}

pub fn bid_stats_event(lot_id: &str, bid_count: u32, is_reserve_met: Option<bool>) -> ServerEvent {
    ServerEvent::BidStatsUpdated {
        lot_id: lot_id.to_string(),
        stats: BidStats {
            bid_count,
            highest_amount: None,
            is_reserve_met,
        },
    }
}

pub fn bid_error_event(lot_id: &str, message: &str, code: Option<BidErrorCode>) -> ServerEvent {
    ServerEvent::BidError {
        lot_id: lot_id.to_string(),
        message: message.to_string(),
        code,
    }
}
