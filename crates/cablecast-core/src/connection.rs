//! Connection Manager state machine.
//!
//! Owns the transport lifecycle: connect, handshake, stale detection,
//! disconnect and reconnect-with-backoff. Uses the action pattern: methods
//! take time and entropy as input and return actions for the driver to
//! execute. No I/O happens here.
//!
//! # State Machine
//!
//! ```text
//!                 connect()             welcome
//! ┌──────────────┐ ───────> ┌────────────┐ ─────> ┌───────────┐
//! │ Disconnected │          │ Connecting │        │ Connected │
//! └──────────────┘ <─────── └────────────┘        └───────────┘
//!        ↑   hook veto / final     ↑ │ failure/timeout   │ failure/stale
//!        │   server close          │ ↓                   ↓
//!        │                   timer ┌──────────────┐ <────┘
//!        └──────────────────────── │ Reconnecting │
//!                  disconnect()    └──────────────┘
//! ```
//!
//! Every transport attempt gets a fresh [`AttemptId`]. Inputs tagged with an
//! older attempt are stale and ignored, as are reconnect timers that are no
//! longer scheduled.

use std::{
    fmt,
    ops::Sub,
    time::{Duration, Instant},
};

use cablecast_proto::ServerMessage;

use crate::{
    backoff::BackoffPolicy,
    error::{DisconnectReason, TransportError},
};

/// Time allowed between starting an attempt and receiving `welcome`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum silence on a connected transport before it is considered stale.
///
/// Servers ping every 3 seconds, so two missed pings close the connection.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(6);

/// Identity of one transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub(crate) u64);

impl AttemptId {
    /// Raw attempt number. Starts at 1 and increases by one per attempt.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt#{}", self.0)
    }
}

/// Identity of one scheduled reconnect timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw timer number.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no pending reconnect
    Disconnected,
    /// Transport attempt in flight, waiting for `welcome`
    Connecting,
    /// `welcome` received on the current attempt
    Connected,
    /// Transport lost, reconnect timer scheduled
    Reconnecting,
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// A new attempt is about to start
    WillConnect,

    /// Open a transport for this attempt
    Open {
        /// Attempt the transport belongs to
        attempt: AttemptId,
    },

    /// Close the transport of this attempt
    Close {
        /// Attempt whose transport should be released
        attempt: AttemptId,
    },

    /// Handshake completed
    Connected {
        /// Attempt that completed the handshake
        attempt: AttemptId,
    },

    /// Transport was lost or closed
    Disconnected {
        /// Classification of the loss
        reason: DisconnectReason,
    },

    /// Start a timer. When it fires, call
    /// [`ConnectionManager::reconnect_timer_fired`] with `timer`.
    ScheduleReconnect {
        /// Timer identity
        timer: TimerId,
        /// Delay before the next attempt
        delay: Duration,
        /// 1-based attempt number within the current episode
        attempt: u32,
    },

    /// Drop the timer. It must not fire.
    CancelReconnect {
        /// Timer identity
        timer: TimerId,
    },

    /// Reconnection stopped for the current episode
    ReconnectHalted,
}

/// Information handed to a [`ReconnectHook`] before each reconnect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectContext {
    /// 1-based attempt number within the current disconnection episode
    pub attempt: u32,
    /// Why the transport was lost
    pub reason: DisconnectReason,
}

/// Decides whether a reconnect attempt should be scheduled.
///
/// Returning `false` halts reconnection until the next explicit `connect()`.
pub trait ReconnectHook: Send {
    /// Polled once before each reconnect attempt.
    fn should_reconnect(&mut self, ctx: &ReconnectContext) -> bool;
}

impl<F> ReconnectHook for F
where
    F: FnMut(&ReconnectContext) -> bool + Send,
{
    fn should_reconnect(&mut self, ctx: &ReconnectContext) -> bool {
        self(ctx)
    }
}

/// Reconnects forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReconnect;

impl ReconnectHook for AlwaysReconnect {
    fn should_reconnect(&mut self, _ctx: &ReconnectContext) -> bool {
        true
    }
}

/// Gives up after `n` consecutive failed attempts.
#[derive(Debug, Clone, Copy)]
pub struct MaxAttempts(pub u32);

impl ReconnectHook for MaxAttempts {
    fn should_reconnect(&mut self, ctx: &ReconnectContext) -> bool {
        ctx.attempt <= self.0
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for receiving `welcome` after an attempt starts
    pub handshake_timeout: Duration,
    /// Silence on a connected transport before it is closed
    pub stale_threshold: Duration,
    /// Delay policy between reconnect attempts
    pub backoff: BackoffPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Connection Manager state machine.
///
/// Pure: no I/O, no Environment storage. Time and jitter entropy are passed
/// as parameters to the methods that need them.
///
/// # Invariants
///
/// - At most one attempt is live (`current_attempt` is `Some` exactly in
///   Connecting and Connected)
/// - At most one reconnect timer is scheduled, and only in Reconnecting
pub struct ConnectionManager<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    config: ConnectionConfig,
    hook: Box<dyn ReconnectHook>,
    /// Attempt currently owning the transport
    current_attempt: Option<AttemptId>,
    last_attempt: u64,
    /// When the current attempt started
    attempt_started: Option<I>,
    /// Last inbound traffic on the current attempt
    last_activity: Option<I>,
    /// Consecutive failed attempts in the current episode
    episode_attempts: u32,
    pending_timer: Option<TimerId>,
    last_timer: u64,
}

impl<I> fmt::Debug for ConnectionManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("current_attempt", &self.current_attempt)
            .field("episode_attempts", &self.episode_attempts)
            .field("pending_timer", &self.pending_timer)
            .finish_non_exhaustive()
    }
}

impl<I> ConnectionManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a manager in [`ConnectionState::Disconnected`] that always
    /// reconnects.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            hook: Box::new(AlwaysReconnect),
            current_attempt: None,
            last_attempt: 0,
            attempt_started: None,
            last_activity: None,
            episode_attempts: 0,
            pending_timer: None,
            last_timer: 0,
        }
    }

    /// Replace the reconnect hook.
    pub fn set_reconnect_hook(&mut self, hook: impl ReconnectHook + 'static) {
        self.hook = Box::new(hook);
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attempt that currently owns the transport. `None` unless Connecting or
    /// Connected.
    #[must_use]
    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.current_attempt
    }

    /// Reconnect timer currently scheduled, if any.
    #[must_use]
    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    /// Consecutive failed attempts in the current disconnection episode.
    #[must_use]
    pub fn episode_attempts(&self) -> u32 {
        self.episode_attempts
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Begin establishing the transport.
    ///
    /// Idempotent while Connecting or Connected. From Reconnecting the pending
    /// timer is cancelled and an attempt starts immediately.
    pub fn connect(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => Vec::new(),
            ConnectionState::Reconnecting => {
                let mut actions = Vec::new();
                if let Some(timer) = self.pending_timer.take() {
                    actions.push(ConnectionAction::CancelReconnect { timer });
                }
                actions.extend(self.start_attempt(now));
                actions
            },
            ConnectionState::Disconnected => {
                self.episode_attempts = 0;
                self.start_attempt(now)
            },
        }
    }

    /// Transport for `attempt` is open. The handshake is still pending.
    ///
    /// A transport opened for a stale attempt is closed right away.
    pub fn transport_opened(&mut self, attempt: AttemptId, now: I) -> Vec<ConnectionAction> {
        if !self.is_current(attempt) {
            tracing::debug!(%attempt, "closing transport opened for stale attempt");
            return vec![ConnectionAction::Close { attempt }];
        }

        self.last_activity = Some(now);
        Vec::new()
    }

    /// Transport for `attempt` could not be opened or was lost.
    pub fn transport_failed(
        &mut self,
        attempt: AttemptId,
        error: TransportError,
        entropy: u64,
    ) -> Vec<ConnectionAction> {
        if !self.is_current(attempt) {
            return Vec::new();
        }

        tracing::warn!(%attempt, %error, "transport failed");
        self.lose_transport(DisconnectReason::Network(error), entropy)
    }

    /// Process an inbound message on `attempt`.
    ///
    /// Channel messages (confirmations, rejections, broadcasts) produce no
    /// connection actions while Connected; the caller routes them. Before
    /// `welcome` they are a protocol violation.
    pub fn handle_message(
        &mut self,
        attempt: AttemptId,
        message: &ServerMessage,
        now: I,
        entropy: u64,
    ) -> Vec<ConnectionAction> {
        if !self.is_current(attempt) {
            return Vec::new();
        }

        self.last_activity = Some(now);

        match (self.state, message) {
            (ConnectionState::Connecting, ServerMessage::Welcome) => {
                self.state = ConnectionState::Connected;
                self.episode_attempts = 0;
                tracing::info!(%attempt, "connected");
                vec![ConnectionAction::Connected { attempt }]
            },
            (_, ServerMessage::Welcome) => {
                tracing::debug!(%attempt, "ignoring duplicate welcome");
                Vec::new()
            },
            (_, ServerMessage::Ping { .. }) => Vec::new(),
            (_, ServerMessage::Disconnect { reason, reconnect }) => self.lose_transport(
                DisconnectReason::ServerClose { reason: reason.clone(), reconnect: *reconnect },
                entropy,
            ),
            (ConnectionState::Connecting, _) => self.lose_transport(
                DisconnectReason::Protocol("channel message before welcome".to_string()),
                entropy,
            ),
            (_, _) => Vec::new(),
        }
    }

    /// Process periodic maintenance (handshake timeout, stale detection).
    pub fn tick(&mut self, now: I, entropy: u64) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting => {
                let Some(started) = self.attempt_started else {
                    return Vec::new();
                };
                let elapsed = now - started;
                if elapsed > self.config.handshake_timeout {
                    return self
                        .lose_transport(DisconnectReason::Network(TransportError::Timeout { elapsed }), entropy);
                }
                Vec::new()
            },
            ConnectionState::Connected => {
                let Some(last) = self.last_activity else {
                    return Vec::new();
                };
                let elapsed = now - last;
                if elapsed > self.config.stale_threshold {
                    return self
                        .lose_transport(DisconnectReason::Network(TransportError::Stale { elapsed }), entropy);
                }
                Vec::new()
            },
            ConnectionState::Disconnected | ConnectionState::Reconnecting => Vec::new(),
        }
    }

    /// Reconnect timer fired.
    ///
    /// Starts the next attempt only if `timer` is the one currently
    /// scheduled. Cancelled or superseded timers are ignored.
    pub fn reconnect_timer_fired(&mut self, timer: TimerId, now: I) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Reconnecting || self.pending_timer != Some(timer) {
            tracing::debug!(timer = timer.get(), "ignoring stale reconnect timer");
            return Vec::new();
        }

        self.pending_timer = None;
        self.start_attempt(now)
    }

    /// Explicit disconnect.
    ///
    /// Cancels any pending reconnect timer and releases the transport.
    /// `Disconnected { reason: None }` is emitted only if an attempt was live.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(timer) = self.pending_timer.take() {
            actions.push(ConnectionAction::CancelReconnect { timer });
        }

        if let Some(attempt) = self.current_attempt.take() {
            actions.push(ConnectionAction::Close { attempt });
            actions.push(ConnectionAction::Disconnected { reason: DisconnectReason::None });
            tracing::info!(%attempt, "disconnected by client");
        }

        self.state = ConnectionState::Disconnected;
        self.attempt_started = None;
        self.last_activity = None;
        self.episode_attempts = 0;
        actions
    }

    fn is_current(&self, attempt: AttemptId) -> bool {
        self.current_attempt == Some(attempt)
    }

    fn start_attempt(&mut self, now: I) -> Vec<ConnectionAction> {
        self.last_attempt += 1;
        let attempt = AttemptId(self.last_attempt);

        self.state = ConnectionState::Connecting;
        self.current_attempt = Some(attempt);
        self.attempt_started = Some(now);
        self.last_activity = None;

        tracing::debug!(%attempt, "starting transport attempt");
        vec![ConnectionAction::WillConnect, ConnectionAction::Open { attempt }]
    }

    fn lose_transport(&mut self, reason: DisconnectReason, entropy: u64) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(attempt) = self.current_attempt.take() {
            actions.push(ConnectionAction::Close { attempt });
        }
        self.attempt_started = None;
        self.last_activity = None;

        let allows_reconnect = reason.allows_reconnect();
        actions.push(ConnectionAction::Disconnected { reason: reason.clone() });

        if !allows_reconnect {
            tracing::info!(%reason, "reconnection disabled by server");
            self.state = ConnectionState::Disconnected;
            actions.push(ConnectionAction::ReconnectHalted);
            return actions;
        }

        self.episode_attempts = self.episode_attempts.saturating_add(1);
        let ctx = ReconnectContext { attempt: self.episode_attempts, reason };

        if !self.hook.should_reconnect(&ctx) {
            tracing::info!(attempt = self.episode_attempts, "reconnect hook halted reconnection");
            self.state = ConnectionState::Disconnected;
            actions.push(ConnectionAction::ReconnectHalted);
            return actions;
        }

        self.last_timer += 1;
        let timer = TimerId(self.last_timer);
        let delay = self.config.backoff.delay(self.episode_attempts, entropy);

        self.state = ConnectionState::Reconnecting;
        self.pending_timer = Some(timer);

        tracing::debug!(attempt = self.episode_attempts, ?delay, "scheduling reconnect");
        actions.push(ConnectionAction::ScheduleReconnect {
            timer,
            delay,
            attempt: self.episode_attempts,
        });
        actions
    }
}
