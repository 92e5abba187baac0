//! The auction session controller.
//!
//! [`SessionController`] owns the canonical in-memory state of one live
//! auction viewing session and reconciles three concurrent sources into a
//! single serialized stream: the 1 Hz local timer tick, push events arriving
//! from the [`EventChannel`](crate::channel::EventChannel), and user-issued
//! commands. Each is processed to completion before the next is admitted, so
//! correctness needs no locks — just serialization plus the lot guard:
//!
//! > every inbound event carries a `lotId`; its effect is applied **only if**
//! > it matches the session's current lot, otherwise it is dropped and
//! > logged.
//!
//! That one guard is what keeps a bid or timer reset meant for the lot we
//! just rotated away from out of the new lot's display. During a rotation the
//! controller awaits the leave/join/refresh sequence as a unit and does not
//! read the event stream at all, so old-lot events buffer behind it and fall
//! to the guard afterwards.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::bidding;
use crate::cache::ReconciliationCache;
use crate::channel::{ChannelEvent, EventChannel, Topic};
use crate::error::{AuctionError, Result};
use crate::error_codes::BidErrorCode;
use crate::protocol::{
    AuctionId, Bid, BidKind, ClientCommand, ConnectionState, Lot, LotId, ServerEvent,
};
use crate::snapshot::SnapshotApi;
use crate::timer::{CountdownTimer, TimerSignal};
use crate::urgency::{self, UrgencyLevel, VELOCITY_WINDOW_SECS};

/// Default capacity of the bounded session event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bid history entries kept per lot, most-recent-first.
pub const DEFAULT_BID_HISTORY_CAPACITY: usize = 10;

/// Default timeout for awaited snapshot fetches.
const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default degraded-mode REST poll interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Retries for the initial auction snapshot before giving up.
const INITIAL_SNAPSHOT_RETRIES: u32 = 2;

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SessionController`].
///
/// The only required input is the auction id; everything else has defaults.
///
/// # Example
///
/// ```
/// use auction_session_client::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new("A-2024-0131")
///     .with_poll_interval(Duration::from_secs(5));
/// assert_eq!(config.auction_id, "A-2024-0131");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The auction to view.
    pub auction_id: AuctionId,
    /// Timeout applied to every awaited snapshot fetch.
    pub snapshot_timeout: Duration,
    /// How often to refresh via REST while the push channel is degraded.
    pub poll_interval: Duration,
    /// Capacity of the bounded session event channel. Values below 1 are
    /// clamped to 1. Terminal `Closed` events are always delivered.
    pub event_channel_capacity: usize,
    /// Bid history entries retained per lot.
    pub bid_history_capacity: usize,
    /// TTL of the reconciliation cache.
    pub cache_ttl: Duration,
    /// Timeout for the graceful shutdown before the loop task is aborted.
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for the given auction with default values.
    pub fn new(auction_id: impl Into<AuctionId>) -> Self {
        Self {
            auction_id: auction_id.into(),
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            bid_history_capacity: DEFAULT_BID_HISTORY_CAPACITY,
            cache_ttl: crate::cache::DEFAULT_TTL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the snapshot fetch timeout.
    #[must_use]
    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    /// Set the degraded-mode poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the session event channel capacity (clamped to at least 1).
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set how many bid history entries are retained.
    #[must_use]
    pub fn with_bid_history_capacity(mut self, capacity: usize) -> Self {
        self.bid_history_capacity = capacity.max(1);
        self
    }

    /// Set the reconciliation cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Phases and events ───────────────────────────────────────────────

/// Lifecycle phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session activity yet.
    Idle,
    /// Initial snapshot fetch and topic joins in flight.
    Joining,
    /// Normal operation: timer ticking, events applied.
    Active,
    /// Lot rotation in progress; event application suspended.
    Rotating,
    /// Terminal. Entered on close or fatal error.
    Closed,
}

/// Why the session closed.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// The host navigated away / requested teardown.
    UserRequested,
    /// An unrecoverable error (e.g. auction not found on initial fetch).
    Fatal(String),
}

/// UI-facing session notifications.
///
/// Emitted on a bounded channel; when the consumer cannot keep up,
/// non-terminal events are dropped with a warning rather than blocking the
/// controller. [`SessionEvent::Closed`] is always delivered.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Initial baseline loaded; the session is now active.
    SnapshotLoaded {
        lot: Lot,
        timer_seconds: u32,
        next_minimum: u64,
    },
    /// Display price / aggregate fields changed.
    PriceUpdated {
        lot_id: LotId,
        current_price: u64,
        bid_count: u32,
        is_reserve_met: bool,
        next_minimum: u64,
    },
    /// A full bid record was appended to the history.
    BidAppended { bid: Bid },
    /// One second elapsed on the lot countdown.
    TimerTick { seconds: u32, urgency: UrgencyLevel },
    /// The countdown reached zero. Display "time up" and await the
    /// authoritative rotation; the lot is not closed locally.
    TimerExpired { lot_id: LotId },
    /// The session moved to a new lot.
    LotRotated {
        previous_lot_id: LotId,
        lot: Lot,
        next_minimum: u64,
        /// The rotation snapshot could not be fetched; the lot fields are
        /// placeholders until the next event refreshes them.
        stale: bool,
    },
    /// A bid was rejected, locally or by the server. `pending_amount` is the
    /// amount the user last attempted, preserved so they can correct it.
    BidRejected {
        lot_id: LotId,
        message: String,
        code: Option<BidErrorCode>,
        pending_amount: Option<u64>,
    },
    /// Push channel connectivity changed. `degraded` means the reconnect
    /// budget is exhausted and the session is refreshing via REST polls.
    ConnectionChanged {
        state: ConnectionState,
        degraded: bool,
    },
    /// Terminal: the session is closed and no further events will follow.
    Closed { reason: CloseReason },
}

/// Commands from the handle to the session loop.
#[derive(Debug)]
enum SessionCmd {
    PlaceBid { kind: BidKind, amount: u64 },
    CancelProxyBid,
    Reconnect,
    Close,
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the session loop.
struct SessionShared {
    phase: AtomicU8,
    stale_dropped: AtomicU64,
    lot: Mutex<Option<Lot>>,
    history: Mutex<Vec<Bid>>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(phase_to_u8(SessionPhase::Idle)),
            stale_dropped: AtomicU64::new(0),
            lot: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    fn store_phase(&self, phase: SessionPhase) {
        self.phase.store(phase_to_u8(phase), Ordering::Release);
    }

    fn load_phase(&self) -> SessionPhase {
        phase_from_u8(self.phase.load(Ordering::Acquire))
    }
}

fn phase_to_u8(phase: SessionPhase) -> u8 {
    match phase {
        SessionPhase::Idle => 0,
        SessionPhase::Joining => 1,
        SessionPhase::Active => 2,
        SessionPhase::Rotating => 3,
        SessionPhase::Closed => 4,
    }
}

fn phase_from_u8(raw: u8) -> SessionPhase {
    match raw {
        1 => SessionPhase::Joining,
        2 => SessionPhase::Active,
        3 => SessionPhase::Rotating,
        4 => SessionPhase::Closed,
        _ => SessionPhase::Idle,
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// Handle to a running auction session.
///
/// Created via [`SessionController::start`]. Command methods queue work to
/// the session loop and return once queued; state accessors read a mirror the
/// loop maintains.
pub struct SessionController {
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    shared: Arc<SessionShared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl SessionController {
    /// Start a session over an already-started [`EventChannel`].
    ///
    /// `channel_rx` must be the receiver returned by the
    /// [`EventChannel::start`] call that produced `channel`. The controller
    /// takes ownership of both and tears the channel down with the session.
    ///
    /// # Returns
    ///
    /// The handle plus the receiver of UI-facing [`SessionEvent`]s. The
    /// receiver yields events until the session closes.
    #[must_use = "the event receiver must be used to receive session events"]
    pub fn start(
        channel: EventChannel,
        channel_rx: mpsc::Receiver<ChannelEvent>,
        api: impl SnapshotApi,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCmd>();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(SessionShared::new());
        let loop_shared = Arc::clone(&shared);
        let shutdown_timeout = config.shutdown_timeout;

        let task = tokio::spawn(session_loop(
            channel,
            channel_rx,
            api,
            config,
            cmd_rx,
            event_tx,
            loop_shared,
            shutdown_rx,
        ));

        let controller = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (controller, event_rx)
    }

    /// Place a bid on the current lot.
    ///
    /// Issued optimistically: the command goes to the transport immediately,
    /// but the displayed price only changes once a confirming event arrives.
    /// Amounts below the computed minimum are rejected locally via
    /// [`SessionEvent::BidRejected`] without touching the wire.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::SessionClosed`] if the session loop has exited.
    pub fn place_bid(&self, kind: BidKind, amount: u64) -> Result<()> {
        self.push(SessionCmd::PlaceBid { kind, amount })
    }

    /// Cancel a standing proxy bid on the current lot.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::SessionClosed`] if the session loop has exited.
    pub fn cancel_proxy_bid(&self) -> Result<()> {
        self.push(SessionCmd::CancelProxyBid)
    }

    /// Manually re-dial the push channel after a degraded disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::SessionClosed`] if the session loop has exited.
    pub fn reconnect(&self) -> Result<()> {
        self.push(SessionCmd::Reconnect)
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.shared.load_phase()
    }

    /// How many stale or out-of-scope events the lot guard has dropped.
    pub fn stale_events_dropped(&self) -> u64 {
        self.shared.stale_dropped.load(Ordering::Acquire)
    }

    /// A copy of the current lot, if the session has one.
    pub async fn current_lot(&self) -> Option<Lot> {
        self.shared.lot.lock().await.clone()
    }

    /// A copy of the retained bid history, most-recent-first. Exactly one
    /// entry carries `is_highest`.
    pub async fn bid_history(&self) -> Vec<Bid> {
        self.shared.history.lock().await.clone()
    }

    /// Close the session: stop the timer, leave all topics, disconnect the
    /// transport, and emit a terminal [`SessionEvent::Closed`].
    ///
    /// Idempotent. After this method returns, the event receiver will yield
    /// `None` once the loop exits.
    pub async fn close(&mut self) {
        debug!("SessionController: close requested");

        let _ = self.cmd_tx.send(SessionCmd::Close);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.store_phase(SessionPhase::Closed);
    }

    fn push(&self, cmd: SessionCmd) -> Result<()> {
        if self.shared.load_phase() == SessionPhase::Closed {
            return Err(AuctionError::SessionClosed);
        }
        self.cmd_tx
            .send(cmd)
            .map_err(|_| AuctionError::SessionClosed)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("phase", &self.phase())
            .field("stale_events_dropped", &self.stale_events_dropped())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Same discipline as the channel handle: Drop cannot await the
        // graceful path, so abort the loop task outright.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Everything the loop mutates, kept off the select arms for clarity.
struct SessionState {
    phase: SessionPhase,
    current_lot: Option<Lot>,
    bid_history: VecDeque<Bid>,
    timer: CountdownTimer,
    urgency: UrgencyLevel,
    /// Arrival instants of recent bid events, pruned to the velocity window.
    recent_bids: VecDeque<Instant>,
    /// The amount the user last attempted, preserved across rejections.
    pending_amount: Option<u64>,
    connection: ConnectionState,
    degraded: bool,
    cache: ReconciliationCache,
    last_poll: Instant,
}

impl SessionState {
    fn new(cache_ttl: Duration) -> Self {
        Self {
            phase: SessionPhase::Idle,
            current_lot: None,
            bid_history: VecDeque::new(),
            timer: CountdownTimer::stopped(),
            urgency: UrgencyLevel::Low,
            recent_bids: VecDeque::new(),
            pending_amount: None,
            connection: ConnectionState::Disconnected,
            degraded: false,
            cache: ReconciliationCache::new(cache_ttl),
            last_poll: Instant::now(),
        }
    }

    fn current_lot_id(&self) -> Option<&str> {
        self.current_lot.as_ref().map(|l| l.lot_id.as_str())
    }

    /// Bids observed within the trailing velocity window.
    fn recent_bid_count(&mut self, now: Instant) -> u32 {
        let window = Duration::from_secs(VELOCITY_WINDOW_SECS);
        while let Some(front) = self.recent_bids.front() {
            if now.saturating_duration_since(*front) > window {
                self.recent_bids.pop_front();
            } else {
                break;
            }
        }
        u32::try_from(self.recent_bids.len()).unwrap_or(u32::MAX)
    }

    fn recompute_urgency(&mut self, now: Instant) {
        let recent = self.recent_bid_count(now);
        let bid_count = self.current_lot.as_ref().map_or(0, |l| l.bid_count);
        self.urgency = urgency::classify(self.timer.remaining(), recent, bid_count);
    }

    fn next_minimum(&self) -> u64 {
        self.current_lot
            .as_ref()
            .map_or(0, |l| bidding::next_minimum(l.current_price, l.min_pre_bid))
    }

    /// Reset everything scoped to a single lot's lifetime.
    fn reset_ephemeral(&mut self) {
        self.bid_history.clear();
        self.recent_bids.clear();
        self.pending_amount = None;
        self.urgency = UrgencyLevel::Low;
        self.timer.stop();
    }
}

/// Context threaded through the loop's helpers.
struct LoopCtx<A: SnapshotApi> {
    channel: EventChannel,
    api: A,
    config: SessionConfig,
    event_tx: mpsc::Sender<SessionEvent>,
    shared: Arc<SessionShared>,
}

impl<A: SnapshotApi> LoopCtx<A> {
    async fn set_phase(&self, state: &mut SessionState, phase: SessionPhase) {
        state.phase = phase;
        self.shared.store_phase(phase);
    }

    async fn mirror_lot(&self, state: &SessionState) {
        *self.shared.lot.lock().await = state.current_lot.clone();
        *self.shared.history.lock().await = state.bid_history.iter().cloned().collect();
    }

    async fn emit(&self, event: SessionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "session event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("session event channel closed, receiver dropped");
            }
        }
    }

    fn drop_stale(&self, expected: Option<&str>, event: &ServerEvent) {
        self.shared.stale_dropped.fetch_add(1, Ordering::AcqRel);
        debug!(
            expected_lot = expected.unwrap_or("<none>"),
            event_lot = event.lot_id().unwrap_or("<none>"),
            "dropped stale or out-of-scope event"
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn session_loop<A: SnapshotApi>(
    channel: EventChannel,
    mut channel_rx: mpsc::Receiver<ChannelEvent>,
    api: A,
    config: SessionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
    event_tx: mpsc::Sender<SessionEvent>,
    shared: Arc<SessionShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(auction_id = %config.auction_id, "session loop started");

    let mut state = SessionState::new(config.cache_ttl);
    let ctx = LoopCtx {
        channel,
        api,
        config,
        event_tx,
        shared,
    };

    // ── Joining ─────────────────────────────────────────────────────
    ctx.set_phase(&mut state, SessionPhase::Joining).await;

    if let Err(e) = ctx.channel.connect() {
        warn!("push channel connect failed at session start: {e}");
    }

    let reason = match join_session(&ctx, &mut state).await {
        Ok(()) => {
            ctx.set_phase(&mut state, SessionPhase::Active).await;
            run_active(&ctx, &mut state, &mut cmd_rx, &mut channel_rx, &mut shutdown_rx).await
        }
        Err(e) => {
            error!("initial snapshot fetch failed: {e}");
            CloseReason::Fatal(e.to_string())
        }
    };

    teardown(ctx, &mut state, reason).await;
}

/// Fetch the initial auction snapshot (with a bounded retry for transient
/// failures; not-found is fatal immediately) and seed session state.
async fn join_session<A: SnapshotApi>(
    ctx: &LoopCtx<A>,
    state: &mut SessionState,
) -> Result<()> {
    let auction_id = ctx.config.auction_id.clone();

    let mut attempt = 0;
    let snapshot = loop {
        let fetch = ctx.api.get_auction_snapshot(&auction_id);
        match tokio::time::timeout(ctx.config.snapshot_timeout, fetch).await {
            Ok(Ok(snapshot)) => break snapshot,
            Ok(Err(e @ AuctionError::NotFound { .. })) => return Err(e),
            Ok(Err(e)) if attempt >= INITIAL_SNAPSHOT_RETRIES => return Err(e),
            Err(_) if attempt >= INITIAL_SNAPSHOT_RETRIES => return Err(AuctionError::Timeout),
            Ok(Err(e)) => warn!(attempt, "initial snapshot fetch failed, retrying: {e}"),
            Err(_) => warn!(attempt, "initial snapshot fetch timed out, retrying"),
        }
        attempt += 1;
    };

    let now = Instant::now();
    let lot = snapshot.current_lot.clone();

    state.current_lot = Some(lot.clone());
    state.bid_history = snapshot
        .bid_history
        .into_iter()
        .take(ctx.config.bid_history_capacity)
        .collect();
    sort_history(&mut state.bid_history);
    mark_highest(&mut state.bid_history);
    state.timer.reset(snapshot.timer_seconds, now);
    state.recompute_urgency(now);
    ctx.mirror_lot(state).await;

    // Leave/join ordering does not matter here; nothing was subscribed yet.
    ctx.channel
        .join_topic(Topic::Auction(snapshot.auction.auction_id.clone()))?;
    ctx.channel.join_topic(Topic::Lot(lot.lot_id.clone()))?;

    let next_minimum = state.next_minimum();
    ctx.emit(SessionEvent::SnapshotLoaded {
        lot,
        timer_seconds: snapshot.timer_seconds,
        next_minimum,
    })
    .await;

    Ok(())
}

/// The serialized event loop: admits one source at a time until close.
async fn run_active<A: SnapshotApi>(
    ctx: &LoopCtx<A>,
    state: &mut SessionState,
    cmd_rx: &mut mpsc::UnboundedReceiver<SessionCmd>,
    channel_rx: &mut mpsc::Receiver<ChannelEvent>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> CloseReason {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCmd::PlaceBid { kind, amount }) => {
                    handle_place_bid(ctx, state, kind, amount).await;
                }
                Some(SessionCmd::CancelProxyBid) => {
                    if let Some(lot_id) = state.current_lot_id() {
                        let cmd = ClientCommand::CancelProxyBid { lot_id: lot_id.to_string() };
                        if let Err(e) = ctx.channel.send(cmd) {
                            warn!("cancel proxy bid send failed: {e}");
                        }
                    }
                }
                Some(SessionCmd::Reconnect) => {
                    if let Err(e) = ctx.channel.connect() {
                        warn!("manual reconnect failed: {e}");
                    }
                }
                Some(SessionCmd::Close) | None => return CloseReason::UserRequested,
            },
            _ = &mut *shutdown_rx => return CloseReason::UserRequested,
            ev = channel_rx.recv() => match ev {
                Some(ChannelEvent::Event(event)) => {
                    apply_event(ctx, state, event).await;
                }
                Some(ChannelEvent::StateChanged { state: conn }) => {
                    state.connection = conn;
                    state.degraded = ctx.channel.is_degraded();
                    ctx.emit(SessionEvent::ConnectionChanged {
                        state: conn,
                        degraded: state.degraded,
                    })
                    .await;
                }
                Some(ChannelEvent::Degraded { error }) => {
                    warn!("push channel degraded, falling back to REST polling: {error}");
                    state.degraded = true;
                    state.last_poll = Instant::now();
                    ctx.emit(SessionEvent::ConnectionChanged {
                        state: ConnectionState::Disconnected,
                        degraded: true,
                    })
                    .await;
                }
                None => {
                    return CloseReason::Fatal("push channel terminated".to_string());
                }
            },
            _ = ticker.tick() => {
                handle_tick(ctx, state).await;
            }
        }
    }
}

/// Local validation, pre-emptive cache invalidation, then optimistic issue.
async fn handle_place_bid<A: SnapshotApi>(
    ctx: &LoopCtx<A>,
    state: &mut SessionState,
    kind: BidKind,
    amount: u64,
) {
    let Some(lot) = state.current_lot.clone() else {
        debug!("place bid ignored: no current lot");
        return;
    };
    state.pending_amount = Some(amount);

    if state.phase == SessionPhase::Rotating {
        ctx.emit(SessionEvent::BidRejected {
            lot_id: lot.lot_id,
            message: "lot is rotating; bidding is briefly suspended".to_string(),
            code: Some(BidErrorCode::LotNotAcceptingBids),
            pending_amount: state.pending_amount,
        })
        .await;
        return;
    }

    if !bidding::is_acceptable(amount, lot.current_price, lot.min_pre_bid) {
        let minimum = bidding::next_minimum(lot.current_price, lot.min_pre_bid);
        ctx.emit(SessionEvent::BidRejected {
            lot_id: lot.lot_id,
            message: format!("bid of {amount} is below the current minimum of {minimum}"),
            code: Some(BidErrorCode::BidTooLow),
            pending_amount: state.pending_amount,
        })
        .await;
        return;
    }

    // Invalidate before the command goes out so any concurrent REST re-fetch
    // after this point sees fresh data, not a value cached pre-bid.
    state.cache.invalidate(&lot.lot_id);

    let command = ClientCommand::PlaceBid {
        lot_id: lot.lot_id.clone(),
        kind,
        amount,
    };
    if let Err(e) = ctx.channel.send(command) {
        warn!("place bid send failed: {e}");
        ctx.emit(SessionEvent::BidRejected {
            lot_id: lot.lot_id,
            message: "bid could not be sent: push channel unavailable".to_string(),
            code: None,
            pending_amount: state.pending_amount,
        })
        .await;
    }
}

/// Drive the countdown and, while degraded, the REST fallback poll.
async fn handle_tick<A: SnapshotApi>(ctx: &LoopCtx<A>, state: &mut SessionState) {
    let now = Instant::now();

    match state.timer.tick(now) {
        Some(TimerSignal::Ticked(seconds)) => {
            state.recompute_urgency(now);
            ctx.emit(SessionEvent::TimerTick {
                seconds,
                urgency: state.urgency,
            })
            .await;
        }
        Some(TimerSignal::Expired) => {
            state.recompute_urgency(now);
            if let Some(lot_id) = state.current_lot_id() {
                let lot_id = lot_id.to_string();
                debug!(lot_id = %lot_id, "countdown expired; awaiting authoritative rotation");
                ctx.emit(SessionEvent::TimerExpired { lot_id }).await;
            }
        }
        None => {}
    }

    if state.degraded
        && state.phase == SessionPhase::Active
        && now.saturating_duration_since(state.last_poll) >= ctx.config.poll_interval
    {
        state.last_poll = now;
        poll_lot_snapshot(ctx, state, now).await;
    }
}

/// Degraded-mode display refresh through the reconciliation cache.
async fn poll_lot_snapshot<A: SnapshotApi>(
    ctx: &LoopCtx<A>,
    state: &mut SessionState,
    now: Instant,
) {
    let Some(lot_id) = state.current_lot_id().map(str::to_string) else {
        return;
    };

    let snapshot = match state.cache.get(&lot_id, now) {
        Some(cached) => cached.clone(),
        None => {
            let fetch = ctx.api.get_lot_snapshot(&lot_id);
            match tokio::time::timeout(ctx.config.snapshot_timeout, fetch).await {
                Ok(Ok(snapshot)) => {
                    state.cache.insert(lot_id.clone(), snapshot.clone(), now);
                    snapshot
                }
                Ok(Err(e)) => {
                    warn!("degraded poll failed: {e}");
                    return;
                }
                Err(_) => {
                    warn!("degraded poll timed out");
                    return;
                }
            }
        }
    };

    let Some(lot) = state.current_lot.as_mut() else {
        return;
    };
    if snapshot.lot.lot_id != lot.lot_id {
        return;
    }
    // The poll refreshes aggregates only; applied-event state always wins
    // once the channel is healthy again, and the reserve latch never reverts.
    lot.current_price = snapshot.lot.current_price;
    lot.bid_count = snapshot.lot.bid_count;
    lot.is_reserve_met = lot.is_reserve_met || snapshot.lot.is_reserve_met;
    lot.min_pre_bid = snapshot.lot.min_pre_bid;

    emit_price_updated(ctx, state).await;
}

/// Apply one inbound server event under the lot guard.
async fn apply_event<A: SnapshotApi>(
    ctx: &LoopCtx<A>,
    state: &mut SessionState,
    event: ServerEvent,
) {
    // Outside Active every inbound event is discarded. Rotation is awaited
    // as a unit, so this arm only runs between rotations.
    if state.phase != SessionPhase::Active {
        ctx.drop_stale(state.current_lot_id(), &event);
        return;
    }

    match event {
        ServerEvent::NewBid { bid } => {
            if state.current_lot_id() != Some(bid.lot_id.as_str()) {
                ctx.drop_stale(state.current_lot_id(), &ServerEvent::NewBid { bid });
                return;
            }
            apply_new_bid(ctx, state, bid).await;
        }
        ServerEvent::TimerReset { lot_id, new_seconds } => {
            if state.current_lot_id() != Some(lot_id.as_str()) {
                ctx.drop_stale(
                    state.current_lot_id(),
                    &ServerEvent::TimerReset { lot_id, new_seconds },
                );
                return;
            }
            let now = Instant::now();
            state.timer.reset(new_seconds, now);
            state.recompute_urgency(now);
            ctx.emit(SessionEvent::TimerTick {
                seconds: new_seconds,
                urgency: state.urgency,
            })
            .await;
        }
        ServerEvent::HighestBidUpdated { lot_id, highest_bid } => {
            if state.current_lot_id() != Some(lot_id.as_str()) {
                ctx.drop_stale(
                    state.current_lot_id(),
                    &ServerEvent::HighestBidUpdated { lot_id, highest_bid },
                );
                return;
            }
            if let Some(lot) = state.current_lot.as_mut() {
                // Summary update: price and reserve only, history untouched.
                lot.current_price = highest_bid.amount;
                if let Some(reserve) = lot.reserve_price {
                    lot.is_reserve_met = lot.is_reserve_met || highest_bid.amount >= reserve;
                }
            }
            emit_price_updated(ctx, state).await;
        }
        ServerEvent::BidStatsUpdated { lot_id, stats } => {
            if state.current_lot_id() != Some(lot_id.as_str()) {
                ctx.drop_stale(
                    state.current_lot_id(),
                    &ServerEvent::BidStatsUpdated { lot_id, stats },
                );
                return;
            }
            if let Some(lot) = state.current_lot.as_mut() {
                lot.bid_count = stats.bid_count;
                if let Some(amount) = stats.highest_amount {
                    lot.current_price = amount;
                }
                // Latched: a stats payload can set the reserve flag but
                // never clear it within the lot's lifetime.
                if stats.is_reserve_met == Some(true) {
                    lot.is_reserve_met = true;
                }
            }
            emit_price_updated(ctx, state).await;
        }
        ServerEvent::BidError { lot_id, message, code } => {
            if state.current_lot_id() != Some(lot_id.as_str()) {
                ctx.drop_stale(
                    state.current_lot_id(),
                    &ServerEvent::BidError { lot_id, message, code },
                );
                return;
            }
            ctx.emit(SessionEvent::BidRejected {
                lot_id,
                message,
                code,
                pending_amount: state.pending_amount,
            })
            .await;
        }
        ServerEvent::MoveToNextLot {
            previous_lot_id,
            next_lot_id,
            next_lot_number,
        } => {
            if state.current_lot_id() != Some(previous_lot_id.as_str()) {
                ctx.drop_stale(
                    state.current_lot_id(),
                    &ServerEvent::MoveToNextLot {
                        previous_lot_id,
                        next_lot_id,
                        next_lot_number,
                    },
                );
                return;
            }
            rotate_lot(ctx, state, previous_lot_id, next_lot_id, next_lot_number).await;
        }
        ServerEvent::ConnectionStateChanged { state: conn, error } => {
            // Server-observed (e.g. session migration); informational.
            if let Some(error) = &error {
                warn!("server reported connection state {conn:?}: {error}");
            }
            ctx.emit(SessionEvent::ConnectionChanged {
                state: conn,
                degraded: state.degraded,
            })
            .await;
        }
    }
}

/// Full bid record: history insert, highest-flag recompute, display update.
async fn apply_new_bid<A: SnapshotApi>(ctx: &LoopCtx<A>, state: &mut SessionState, bid: Bid) {
    let now = Instant::now();

    state.bid_history.push_front(bid.clone());
    sort_history(&mut state.bid_history);
    state.bid_history.truncate(ctx.config.bid_history_capacity);
    mark_highest(&mut state.bid_history);

    if let Some(lot) = state.current_lot.as_mut() {
        // Display follows arrival order even when placed_at is older; the
        // history above is the placed_at-ordered view.
        lot.current_price = bid.amount;
        lot.bid_count = lot.bid_count.saturating_add(1);
        if let Some(reserve) = lot.reserve_price {
            lot.is_reserve_met = lot.is_reserve_met || bid.amount >= reserve;
        }
    }

    state.cache.invalidate(&bid.lot_id);
    state.recent_bids.push_back(now);
    state.recompute_urgency(now);

    ctx.emit(SessionEvent::BidAppended { bid }).await;
    emit_price_updated(ctx, state).await;
}

/// Leave old topic, join new, refresh the baseline — awaited as a unit.
async fn rotate_lot<A: SnapshotApi>(
    ctx: &LoopCtx<A>,
    state: &mut SessionState,
    previous_lot_id: LotId,
    next_lot_id: LotId,
    next_lot_number: u32,
) {
    debug!(previous = %previous_lot_id, next = %next_lot_id, "rotating lot");
    ctx.set_phase(state, SessionPhase::Rotating).await;

    // Leave before join to bound the window where both lots are subscribed.
    if let Err(e) = ctx.channel.leave_topic(Topic::Lot(previous_lot_id.clone())) {
        warn!("leave old lot topic failed: {e}");
    }
    if let Err(e) = ctx.channel.join_topic(Topic::Lot(next_lot_id.clone())) {
        warn!("join new lot topic failed: {e}");
    }

    state.reset_ephemeral();
    state.cache.invalidate(&previous_lot_id);

    // One retry for transient refresh failures; a stale placeholder after
    // that keeps the session alive until the next event fills it in.
    let mut snapshot = None;
    for attempt in 0..2 {
        let fetch = ctx.api.get_lot_snapshot(&next_lot_id);
        match tokio::time::timeout(ctx.config.snapshot_timeout, fetch).await {
            Ok(Ok(snap)) => {
                snapshot = Some(snap);
                break;
            }
            Ok(Err(e)) => warn!(attempt, "rotation snapshot fetch failed: {e}"),
            Err(_) => warn!(attempt, "rotation snapshot fetch timed out"),
        }
    }

    let (lot, stale) = match snapshot {
        Some(snap) => {
            let now = Instant::now();
            state
                .cache
                .insert(next_lot_id.clone(), snap.clone(), now);
            (snap.lot, false)
        }
        None => (
            Lot {
                lot_id: next_lot_id.clone(),
                lot_number: next_lot_number,
                current_price: 0,
                bid_count: 0,
                reserve_price: None,
                is_reserve_met: false,
                min_pre_bid: 0,
            },
            true,
        ),
    };

    state.current_lot = Some(lot.clone());
    ctx.mirror_lot(state).await;
    ctx.set_phase(state, SessionPhase::Active).await;

    let next_minimum = state.next_minimum();
    ctx.emit(SessionEvent::LotRotated {
        previous_lot_id,
        lot,
        next_minimum,
        stale,
    })
    .await;
}

async fn emit_price_updated<A: SnapshotApi>(ctx: &LoopCtx<A>, state: &SessionState) {
    let Some(lot) = state.current_lot.as_ref() else {
        return;
    };
    ctx.mirror_lot(state).await;
    ctx.emit(SessionEvent::PriceUpdated {
        lot_id: lot.lot_id.clone(),
        current_price: lot.current_price,
        bid_count: lot.bid_count,
        is_reserve_met: lot.is_reserve_met,
        next_minimum: state.next_minimum(),
    })
    .await;
}

/// Most-recent-first by `placed_at`; stable so equal timestamps keep
/// arrival order.
fn sort_history(history: &mut VecDeque<Bid>) {
    history
        .make_contiguous()
        .sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
}

/// Exactly one bid carries `is_highest`: the max amount, latest placed_at
/// winning ties.
fn mark_highest(history: &mut VecDeque<Bid>) {
    let highest = history
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.amount
                .cmp(&b.amount)
                .then_with(|| a.placed_at.cmp(&b.placed_at))
        })
        .map(|(i, _)| i);
    for (i, bid) in history.iter_mut().enumerate() {
        bid.is_highest = Some(i) == highest;
    }
}

/// Teardown order: timer, then topics, then transport. Every step is
/// idempotent, so a close racing a fatal exit settles in the same state.
async fn teardown<A: SnapshotApi>(
    mut ctx: LoopCtx<A>,
    state: &mut SessionState,
    reason: CloseReason,
) {
    debug!("session teardown: {reason:?}");

    state.timer.stop();
    state.cache.clear();

    if let Some(lot_id) = state.current_lot_id().map(str::to_string) {
        let _ = ctx.channel.leave_topic(Topic::Lot(lot_id));
    }
    let _ = ctx
        .channel
        .leave_topic(Topic::Auction(ctx.config.auction_id.clone()));

    ctx.channel.shutdown().await;

    ctx.set_phase(state, SessionPhase::Closed).await;

    // Terminal event: always delivered, never dropped.
    if ctx
        .event_tx
        .send(SessionEvent::Closed { reason })
        .await
        .is_err()
    {
        debug!("session event channel closed, receiver dropped");
    }
    debug!("session loop exited");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn bid(amount: u64, placed_at_secs: i64) -> Bid {
        Bid {
            id: Uuid::new_v4(),
            lot_id: "L1".to_string(),
            bidder_id: Uuid::new_v4(),
            bidder_name: "tester".to_string(),
            amount,
            placed_at: Utc.timestamp_opt(placed_at_secs, 0).unwrap(),
            is_highest: false,
        }
    }

    #[test]
    fn history_sorts_most_recent_first() {
        let mut history: VecDeque<Bid> =
            vec![bid(100, 10), bid(200, 30), bid(150, 20)].into();
        sort_history(&mut history);
        let times: Vec<i64> = history.iter().map(|b| b.placed_at.timestamp()).collect();
        assert_eq!(times, vec![30, 20, 10]);
    }

    #[test]
    fn exactly_one_bid_marked_highest() {
        let mut history: VecDeque<Bid> =
            vec![bid(500, 10), bid(900, 20), bid(700, 30)].into();
        mark_highest(&mut history);
        let flagged: Vec<u64> = history
            .iter()
            .filter(|b| b.is_highest)
            .map(|b| b.amount)
            .collect();
        assert_eq!(flagged, vec![900]);
    }

    #[test]
    fn highest_tie_goes_to_latest_placement() {
        let mut history: VecDeque<Bid> = vec![bid(900, 10), bid(900, 40)].into();
        mark_highest(&mut history);
        let winner = history.iter().find(|b| b.is_highest).unwrap();
        assert_eq!(winner.placed_at.timestamp(), 40);
        assert_eq!(history.iter().filter(|b| b.is_highest).count(), 1);
    }

    #[test]
    fn phase_encoding_round_trips() {
        for phase in [
            SessionPhase::Idle,
            SessionPhase::Joining,
            SessionPhase::Active,
            SessionPhase::Rotating,
            SessionPhase::Closed,
        ] {
            assert_eq!(phase_from_u8(phase_to_u8(phase)), phase);
        }
    }

    #[test]
    fn config_defaults_and_builders() {
        let config = SessionConfig::new("A1");
        assert_eq!(config.auction_id, "A1");
        assert_eq!(config.bid_history_capacity, DEFAULT_BID_HISTORY_CAPACITY);
        assert_eq!(config.poll_interval, Duration::from_secs(10));

        let config = SessionConfig::new("A1")
            .with_event_channel_capacity(0)
            .with_bid_history_capacity(3)
            .with_poll_interval(Duration::from_secs(2));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.bid_history_capacity, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn velocity_window_prunes_old_arrivals() {
        let mut state = SessionState::new(Duration::from_secs(5));
        let start = Instant::now();
        state.recent_bids.push_back(start);
        state.recent_bids.push_back(start + Duration::from_secs(20));
        state.recent_bids.push_back(start + Duration::from_secs(40));

        let now = start + Duration::from_secs(45);
        assert_eq!(state.recent_bid_count(now), 2);
        assert_eq!(state.recent_bids.len(), 2);
    }
}
