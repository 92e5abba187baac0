//! Reconnecting push-transport channel.
//!
//! [`EventChannel`] is a thin handle that communicates with a background
//! channel loop task via an unbounded MPSC channel. The loop owns the live
//! [`Transport`] and a [`Connector`] for re-dialing it, drives the connection
//! state machine (`Disconnected → Connecting → Connected → Reconnecting →
//! Connected | Disconnected`), and emits typed [`ChannelEvent`]s on a bounded
//! channel returned from [`EventChannel::start`].
//!
//! The channel deliberately promises nothing about event ordering or
//! exactly-once delivery: the transport is at-least-once and
//! unordered-tolerant, and the session controller reconstructs ordering with
//! its lot guard. What the channel *does* guarantee:
//!
//! - `connect()` is idempotent (no-op while Connecting/Connected)
//! - `join_topic`/`leave_topic` are idempotent; joins issued while offline
//!   are remembered and flushed once connected
//! - every successful (re)connect re-joins all joined topics exactly once
//! - after `max_retries` consecutive failed attempts the channel goes
//!   `Disconnected` with a degraded flag — a recoverable condition, not a
//!   fatal one; a later manual `connect()` starts a fresh retry budget

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{AuctionError, Result};
use crate::protocol::{AuctionId, ClientCommand, ConnectionState, LotId, ServerEvent};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Commands queued while offline beyond this limit evict the oldest.
const PENDING_COMMAND_LIMIT: usize = 64;

// ── Backoff schedule ────────────────────────────────────────────────

/// The deterministic backoff delay for a retry attempt (0-based).
///
/// `base * 2^attempt`, capped at `max`. Pure so the schedule is testable
/// without timers; jitter is applied separately by [`apply_jitter`].
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

/// Spread a delay by a symmetric jitter fraction (e.g. `0.25` = ±25%).
///
/// Jitter keeps a fleet of clients from re-dialing a recovering server in
/// lockstep. `jitter <= 0` returns the delay unchanged.
pub fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let spread = delay.as_secs_f64() * jitter;
    let offset = fastrand::f64() * 2.0 - 1.0; // [-1.0, 1.0)
    Duration::from_secs_f64((delay.as_secs_f64() + offset * spread).max(0.0))
}

// ── Topics ──────────────────────────────────────────────────────────

/// A server-side event subscription scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Auction-wide events: lot rotation, session lifecycle.
    Auction(AuctionId),
    /// Per-lot events: bids, timer resets, bid errors.
    Lot(LotId),
}

impl Topic {
    /// The wire command that subscribes to this topic.
    pub fn join_command(&self) -> ClientCommand {
        match self {
            Self::Auction(id) => ClientCommand::JoinAuction {
                auction_id: id.clone(),
            },
            Self::Lot(id) => ClientCommand::JoinLot { lot_id: id.clone() },
        }
    }

    /// The wire command that unsubscribes, if the protocol has one.
    ///
    /// The wire defines no `leaveAuction`; leaving an auction topic is local
    /// bookkeeping only.
    pub fn leave_command(&self) -> Option<ClientCommand> {
        match self {
            Self::Auction(_) => None,
            Self::Lot(id) => Some(ClientCommand::LeaveLot { lot_id: id.clone() }),
        }
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for an [`EventChannel`].
///
/// # Example
///
/// ```
/// use auction_session_client::channel::ChannelConfig;
/// use std::time::Duration;
///
/// let config = ChannelConfig::new()
///     .with_max_retries(3)
///     .with_base_delay(Duration::from_millis(250));
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// First reconnect delay; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up and going degraded.
    pub max_retries: u32,
    /// Symmetric jitter fraction applied to each delay (`0.25` = ±25%).
    pub jitter: f64,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) to avoid blocking the channel loop. The terminal
    /// `Disconnected` state change is always delivered regardless.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown before the loop task is aborted.
    pub shutdown_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelConfig {
    /// Default configuration: 500ms base, 30s cap, 5 retries, ±25% jitter.
    pub fn new() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
            jitter: 0.25,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the first reconnect delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the consecutive-failure budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the jitter fraction. Negative values disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Events and commands ─────────────────────────────────────────────

/// Notifications emitted by the channel loop.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The connection state machine moved.
    StateChanged { state: ConnectionState },
    /// The reconnect budget is exhausted; the channel is `Disconnected` and
    /// the degraded flag is set. Consumers may fall back to REST polling.
    Degraded { error: String },
    /// A decoded server event.
    Event(ServerEvent),
}

/// Commands from the handle to the channel loop.
#[derive(Debug)]
enum ChannelCmd {
    Connect,
    Join(Topic),
    Leave(Topic),
    Send(ClientCommand),
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the channel loop.
struct ChannelShared {
    state: AtomicU8,
    degraded: AtomicBool,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(state_to_u8(ConnectionState::Disconnected)),
            degraded: AtomicBool::new(false),
        }
    }

    fn load(&self) -> ConnectionState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    fn store(&self, state: ConnectionState) {
        self.state.store(state_to_u8(state), Ordering::Release);
    }
}

fn state_to_u8(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
        ConnectionState::Reconnecting => 3,
    }
}

fn state_from_u8(raw: u8) -> ConnectionState {
    match raw {
        1 => ConnectionState::Connecting,
        2 => ConnectionState::Connected,
        3 => ConnectionState::Reconnecting,
        _ => ConnectionState::Disconnected,
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// Handle to a reconnecting push channel.
///
/// Created via [`EventChannel::start`], which spawns the background channel
/// loop and returns this handle together with an event receiver. All methods
/// queue a command to the loop and return once it is queued (no round-trip
/// await).
pub struct EventChannel {
    cmd_tx: mpsc::UnboundedSender<ChannelCmd>,
    shared: Arc<ChannelShared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl EventChannel {
    /// Start the channel loop and return a handle plus event receiver.
    ///
    /// The loop starts `Disconnected`; call [`connect`](Self::connect) to
    /// dial. Topics joined before connecting are flushed once the connection
    /// completes.
    #[must_use = "the event receiver must be used to receive channel events"]
    pub fn start(
        connector: impl Connector + Sync,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ChannelCmd>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(ChannelShared::new());
        let loop_shared = Arc::clone(&shared);
        let shutdown_timeout = config.shutdown_timeout;

        let task = tokio::spawn(channel_loop(
            connector,
            config,
            cmd_rx,
            event_tx,
            loop_shared,
            shutdown_rx,
        ));

        let channel = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (channel, event_rx)
    }

    /// Dial the server. Idempotent: a no-op while already Connecting,
    /// Connected, or Reconnecting.
    ///
    /// After a degraded disconnect this starts a fresh retry budget and
    /// re-joins all joined topics on success.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::TransportClosed`] if the channel loop has
    /// exited.
    pub fn connect(&self) -> Result<()> {
        match self.shared.load() {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => Ok(()),
            ConnectionState::Disconnected => self.push(ChannelCmd::Connect),
        }
    }

    /// Subscribe to a topic. Idempotent; queued until connected.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::TransportClosed`] if the channel loop has exited.
    pub fn join_topic(&self, topic: Topic) -> Result<()> {
        self.push(ChannelCmd::Join(topic))
    }

    /// Unsubscribe from a topic. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::TransportClosed`] if the channel loop has exited.
    pub fn leave_topic(&self, topic: Topic) -> Result<()> {
        self.push(ChannelCmd::Leave(topic))
    }

    /// Send a command to the server. Queued (bounded) while offline and
    /// flushed after the next successful connect.
    ///
    /// # Errors
    ///
    /// Returns [`AuctionError::NotConnected`] while the channel is degraded:
    /// no reconnect is coming without a manual [`connect`](Self::connect), so
    /// queuing the command would strand it. Returns
    /// [`AuctionError::TransportClosed`] if the channel loop has exited.
    pub fn send(&self, command: ClientCommand) -> Result<()> {
        if self.is_degraded() {
            return Err(AuctionError::NotConnected);
        }
        self.push(ChannelCmd::Send(command))
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.load()
    }

    /// Whether the reconnect budget was exhausted since the last successful
    /// connect.
    pub fn is_degraded(&self) -> bool {
        self.shared.degraded.load(Ordering::Acquire)
    }

    /// Shut down the channel, closing the transport and stopping the loop.
    ///
    /// After this method returns, the event receiver will yield `None` once
    /// the loop exits.
    pub async fn shutdown(&mut self) {
        debug!("EventChannel: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout. If it doesn't exit in time, abort it
        // so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("channel loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("channel loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("channel loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.store(ConnectionState::Disconnected);
    }

    fn push(&self, cmd: ChannelCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| AuctionError::TransportClosed)
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("state", &self.state())
            .field("degraded", &self.is_degraded())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown; the
        // only safe action is to abort the spawned task. The shutdown oneshot
        // is intentionally not sent here: the graceful path awaits
        // `transport.close()`, and there is no executor context to drive it
        // inside `Drop`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Channel loop ────────────────────────────────────────────────────

/// What ended a connect/reconnect cycle.
enum CycleOutcome<T> {
    Connected(T),
    Exhausted,
    ShutdownRequested,
}

struct LoopCtx<C: Connector> {
    connector: C,
    config: ChannelConfig,
    event_tx: mpsc::Sender<ChannelEvent>,
    shared: Arc<ChannelShared>,
    /// Join-ordered subscription set; re-sent in order on every reconnect.
    joined: Vec<Topic>,
    /// Commands queued while offline. Bounded; oldest dropped past the limit.
    pending: VecDeque<ClientCommand>,
}

impl<C: Connector> LoopCtx<C> {
    async fn set_state(&self, state: ConnectionState) {
        self.shared.store(state);
        emit_event(&self.event_tx, ChannelEvent::StateChanged { state }).await;
    }

    /// Dial with backoff until connected, the retry budget runs out, or
    /// shutdown is requested. `first_state` distinguishes an initial
    /// `Connecting` from a `Reconnecting` resume.
    async fn connect_cycle(
        &mut self,
        first_state: ConnectionState,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> CycleOutcome<C::Output> {
        self.set_state(first_state).await;

        let mut last_error = String::new();
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = apply_jitter(
                    backoff_delay(attempt - 1, self.config.base_delay, self.config.max_delay),
                    self.config.jitter,
                );
                debug!(attempt, ?delay, "waiting before reconnect attempt");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = &mut *shutdown_rx => return CycleOutcome::ShutdownRequested,
                }
            }

            match self.connector.connect().await {
                Ok(mut transport) => {
                    self.shared.degraded.store(false, Ordering::Release);
                    self.set_state(ConnectionState::Connected).await;

                    // Re-establish subscriptions exactly once each, in join
                    // order, then flush commands queued while offline.
                    for topic in self.joined.clone() {
                        if let Err(e) = send_command(&mut transport, &topic.join_command()).await {
                            warn!("failed to re-join topic after connect: {e}");
                        }
                    }
                    while let Some(cmd) = self.pending.pop_front() {
                        if let Err(e) = send_command(&mut transport, &cmd).await {
                            warn!("failed to flush queued command: {e}");
                        }
                    }
                    return CycleOutcome::Connected(transport);
                }
                Err(e) => {
                    warn!(attempt, "connection attempt failed: {e}");
                    last_error = e.to_string();
                }
            }
        }

        self.shared.degraded.store(true, Ordering::Release);
        error!(
            retries = self.config.max_retries,
            "reconnect budget exhausted; channel degraded"
        );
        emit_event(
            &self.event_tx,
            ChannelEvent::Degraded {
                error: last_error.clone(),
            },
        )
        .await;
        self.set_state(ConnectionState::Disconnected).await;
        CycleOutcome::Exhausted
    }

    fn queue_pending(&mut self, cmd: ClientCommand) {
        if self.pending.len() >= PENDING_COMMAND_LIMIT {
            warn!("pending command queue full, dropping oldest");
            self.pending.pop_front();
        }
        self.pending.push_back(cmd);
    }

    /// Register a join. Returns the wire command to send only on the first
    /// join of a topic — calling twice produces one subscription, not two.
    fn register_join(&mut self, topic: Topic) -> Option<ClientCommand> {
        if self.joined.contains(&topic) {
            debug!(?topic, "topic already joined, ignoring duplicate join");
            return None;
        }
        let cmd = topic.join_command();
        self.joined.push(topic);
        Some(cmd)
    }

    /// Deregister a join. Returns the wire leave command when one exists and
    /// the topic was actually joined.
    fn register_leave(&mut self, topic: &Topic) -> Option<ClientCommand> {
        let Some(pos) = self.joined.iter().position(|t| t == topic) else {
            debug!(?topic, "topic not joined, ignoring leave");
            return None;
        };
        self.joined.remove(pos);
        topic.leave_command()
    }
}

async fn send_command(
    transport: &mut impl Transport,
    command: &ClientCommand,
) -> Result<()> {
    let json = serde_json::to_string(command)?;
    transport.send(json).await
}

/// Why the connected phase ended.
enum ConnectedExit {
    /// The transport dropped or errored; a reconnect cycle should follow.
    Dropped,
    /// The handle was dropped or shut down; the loop should exit.
    Finished,
}

/// Background loop that owns the transport and the connection state machine.
///
/// Exits when:
/// - The command channel closes (handle dropped)
/// - The shutdown signal fires
async fn channel_loop<C: Connector>(
    connector: C,
    config: ChannelConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ChannelCmd>,
    event_tx: mpsc::Sender<ChannelEvent>,
    shared: Arc<ChannelShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("channel loop started");

    let mut ctx = LoopCtx {
        connector,
        config,
        event_tx,
        shared,
        joined: Vec::new(),
        pending: VecDeque::new(),
    };

    'outer: loop {
        // ── Offline: wait for connect/shutdown, book-keep everything else ──
        let mut transport = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ChannelCmd::Connect) => {
                        match ctx.connect_cycle(ConnectionState::Connecting, &mut shutdown_rx).await {
                            CycleOutcome::Connected(t) => break t,
                            CycleOutcome::Exhausted => {}
                            CycleOutcome::ShutdownRequested => break 'outer,
                        }
                    }
                    // Remembered; the join command goes out on connect.
                    Some(ChannelCmd::Join(topic)) => {
                        let _ = ctx.register_join(topic);
                    }
                    Some(ChannelCmd::Leave(topic)) => {
                        let _ = ctx.register_leave(&topic);
                    }
                    Some(ChannelCmd::Send(c)) => ctx.queue_pending(c),
                    None => {
                        debug!("command channel closed, shutting down channel loop");
                        break 'outer;
                    }
                },
                _ = &mut shutdown_rx => break 'outer,
            }
        };

        // ── Online: multiplex commands and inbound events ──
        loop {
            match run_connected(&mut ctx, transport, &mut cmd_rx, &mut shutdown_rx).await {
                ConnectedExit::Dropped => {
                    match ctx
                        .connect_cycle(ConnectionState::Reconnecting, &mut shutdown_rx)
                        .await
                    {
                        CycleOutcome::Connected(t) => transport = t,
                        // Degraded; idle offline until a manual connect().
                        CycleOutcome::Exhausted => continue 'outer,
                        CycleOutcome::ShutdownRequested => break 'outer,
                    }
                }
                ConnectedExit::Finished => break 'outer,
            }
        }
    }

    // Terminal state change: always delivered, never dropped.
    ctx.shared.store(ConnectionState::Disconnected);
    let final_event = ChannelEvent::StateChanged {
        state: ConnectionState::Disconnected,
    };
    if ctx.event_tx.send(final_event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
    debug!("channel loop exited");
}

/// Drive one connection until it drops or the channel is torn down.
async fn run_connected<C: Connector>(
    ctx: &mut LoopCtx<C>,
    mut transport: C::Output,
    cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCmd>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> ConnectedExit {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                // Already connected; idempotent no-op.
                Some(ChannelCmd::Connect) => {}
                Some(ChannelCmd::Join(topic)) => {
                    if let Some(join) = ctx.register_join(topic) {
                        if let Err(e) = send_command(&mut transport, &join).await {
                            error!("join send failed: {e}");
                            return ConnectedExit::Dropped;
                        }
                    }
                }
                Some(ChannelCmd::Leave(topic)) => {
                    if let Some(leave) = ctx.register_leave(&topic) {
                        if let Err(e) = send_command(&mut transport, &leave).await {
                            error!("leave send failed: {e}");
                            return ConnectedExit::Dropped;
                        }
                    }
                }
                Some(ChannelCmd::Send(c)) => {
                    if let Err(e) = send_command(&mut transport, &c).await {
                        error!("command send failed: {e}");
                        // Keep the command for the next connection.
                        ctx.queue_pending(c);
                        return ConnectedExit::Dropped;
                    }
                }
                None => {
                    debug!("command channel closed, shutting down channel loop");
                    let _ = transport.close().await;
                    return ConnectedExit::Finished;
                }
            },
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                // Flush commands queued before the shutdown signal so a
                // teardown's leave frames still reach the wire.
                while let Ok(cmd) = cmd_rx.try_recv() {
                    let frame = match cmd {
                        ChannelCmd::Join(topic) => ctx.register_join(topic),
                        ChannelCmd::Leave(topic) => ctx.register_leave(&topic),
                        ChannelCmd::Send(c) => Some(c),
                        ChannelCmd::Connect => None,
                    };
                    if let Some(frame) = frame {
                        if let Err(e) = send_command(&mut transport, &frame).await {
                            warn!("failed to flush command during shutdown: {e}");
                            break;
                        }
                    }
                }
                let _ = transport.close().await;
                return ConnectedExit::Finished;
            }
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            emit_event(&ctx.event_tx, ChannelEvent::Event(event)).await;
                        }
                        Err(e) => {
                            warn!("failed to deserialize server event: {e} — raw: {text}");
                        }
                    }
                }
                Some(Err(e)) => {
                    error!("transport receive error: {e}");
                    return ConnectedExit::Dropped;
                }
                None => {
                    debug!("transport closed by server");
                    return ConnectedExit::Dropped;
                }
            }
        }
    }
}

/// Emit an event. If the bounded channel is full, log and drop the event to
/// avoid blocking the channel loop.
async fn emit_event(event_tx: &mpsc::Sender<ChannelEvent>, event: ChannelEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let base = ms(500);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(0, base, cap), ms(500));
        assert_eq!(backoff_delay(1, base, cap), ms(1_000));
        assert_eq!(backoff_delay(2, base, cap), ms(2_000));
        assert_eq!(backoff_delay(3, base, cap), ms(4_000));
        // 500ms * 2^10 = 512s, capped.
        assert_eq!(backoff_delay(10, base, cap), cap);
        // Huge attempt numbers must not overflow.
        assert_eq!(backoff_delay(u32::MAX, base, cap), cap);
    }

    #[test]
    fn jitter_stays_within_spread() {
        let delay = Duration::from_secs(10);
        for _ in 0..200 {
            let jittered = apply_jitter(delay, 0.25);
            assert!(jittered >= Duration::from_secs_f64(7.49), "{jittered:?}");
            assert!(jittered <= Duration::from_secs_f64(12.51), "{jittered:?}");
        }
    }

    #[test]
    fn zero_jitter_is_identity() {
        let delay = ms(1_234);
        assert_eq!(apply_jitter(delay, 0.0), delay);
        assert_eq!(apply_jitter(delay, -1.0), delay);
    }

    #[test]
    fn topic_join_commands() {
        let auction = Topic::Auction("A-1".into());
        assert!(matches!(
            auction.join_command(),
            ClientCommand::JoinAuction { auction_id } if auction_id == "A-1"
        ));
        let lot = Topic::Lot("L1".into());
        assert!(matches!(
            lot.join_command(),
            ClientCommand::JoinLot { lot_id } if lot_id == "L1"
        ));
    }

    #[test]
    fn only_lots_have_leave_commands() {
        assert!(Topic::Auction("A-1".to_string()).leave_command().is_none());
        assert!(matches!(
            Topic::Lot("L1".into()).leave_command(),
            Some(ClientCommand::LeaveLot { lot_id }) if lot_id == "L1"
        ));
    }

    #[test]
    fn config_defaults() {
        let config = ChannelConfig::new();
        assert_eq!(config.base_delay, ms(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_builder_methods() {
        let config = ChannelConfig::new()
            .with_base_delay(ms(100))
            .with_max_delay(Duration::from_secs(5))
            .with_max_retries(2)
            .with_jitter(0.0)
            .with_event_channel_capacity(0)
            .with_shutdown_timeout(ms(250));
        assert_eq!(config.base_delay, ms(100));
        assert_eq!(config.max_retries, 2);
        // Capacity clamped to 1.
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.shutdown_timeout, ms(250));
    }
}
