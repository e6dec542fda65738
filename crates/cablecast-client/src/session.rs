//! Session runtime.
//!
//! [`Session`] is the designated execution context: every state transition
//! and every [`SessionEvent`] happens inside [`Session::next_event`] or one of
//! the synchronous caller operations. Transport I/O runs on spawned tasks that
//! only forward open results and [`LinkEvent`]s through channels.
//!
//! The reconnect timer is an owned future inside the session. Cancelling it
//! drops the future synchronously, so a cancelled timer can never fire.

use std::{collections::VecDeque, fmt, future::Future, pin::Pin, sync::Arc, time::Duration};

use cablecast_core::{
    AttemptId, Client, ClientAction, ClientConfig, ClientError, ClientEvent, ConnectionState,
    Decoder, Environment, ReconnectHook, SessionEvent, Subscription, SubscriptionState, TimerId,
    TransportError,
};
use cablecast_proto::Params;
use serde::de::DeserializeOwned;
use tokio::{
    sync::mpsc,
    task::AbortHandle,
    time::{Interval, MissedTickBehavior},
};

use crate::transport::{LinkEvent, Transport, TransportLink};

/// Interval of the maintenance tick (handshake timeout, stale detection).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Endpoint, headers and connection policy
    pub client: ClientConfig,
    /// Maintenance tick interval
    pub tick_interval: Duration,
}

impl SessionConfig {
    /// Configuration with the default tick interval.
    #[must_use]
    pub fn new(client: ClientConfig) -> Self {
        Self { client, tick_interval: DEFAULT_TICK_INTERVAL }
    }
}

/// Result of a spawned open, sent back to the session.
enum Signal {
    Opened { attempt: AttemptId, result: Result<TransportLink, TransportError> },
}

struct ReconnectTimer {
    id: TimerId,
    sleep: Pin<Box<dyn Future<Output = ()> + Send>>,
}

enum Input {
    Signal(Signal),
    Link(AttemptId, Option<LinkEvent>),
    Timer(TimerId),
    Tick,
}

/// Async messaging session.
///
/// Caller operations (`connect`, `subscribe`, `perform`, ...) never block:
/// they validate preconditions, queue work and return. Results arrive as
/// [`SessionEvent`]s from [`Session::next_event`], in order.
pub struct Session<P, E: Environment> {
    client: Client<P, E>,
    transport: Arc<dyn Transport>,
    link: Option<(AttemptId, TransportLink)>,
    opening: Option<(AttemptId, AbortHandle)>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
    timer: Option<ReconnectTimer>,
    tick: Interval,
    events: VecDeque<SessionEvent<P>>,
}

impl<P, E: Environment> fmt::Debug for Session<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.client)
            .field("link", &self.link.as_ref().map(|(attempt, _)| *attempt))
            .field("opening", &self.opening.as_ref().map(|(attempt, _)| *attempt))
            .field("timer", &self.timer.as_ref().map(|t| t.id))
            .field("queued_events", &self.events.len())
            .finish()
    }
}

impl<P, E: Environment> Session<P, E> {
    /// Create a disconnected session.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>, env: E) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let mut tick = tokio::time::interval(config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            client: Client::new(config.client, env),
            transport,
            link: None,
            opening: None,
            signals_tx,
            signals_rx,
            timer: None,
            tick,
            events: VecDeque::new(),
        }
    }

    /// Underlying sans-IO client.
    #[must_use]
    pub fn client(&self) -> &Client<P, E> {
        &self.client
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    /// State of `subscription`, if it belongs to this session.
    #[must_use]
    pub fn subscription_state(&self, subscription: &Subscription) -> Option<SubscriptionState> {
        self.client.subscription_state(subscription)
    }

    /// True if a reconnect timer is scheduled.
    #[must_use]
    pub fn has_pending_reconnect(&self) -> bool {
        self.timer.is_some()
    }

    /// Replace the reconnect hook.
    pub fn set_reconnect_hook(&mut self, hook: impl ReconnectHook + 'static) {
        self.client.set_reconnect_hook(hook);
    }

    /// Begin connecting. Idempotent while connecting or connected.
    pub fn connect(&mut self) {
        self.client.connect();
        self.execute();
    }

    /// Disconnect. Cancels any pending reconnect before returning.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
        self.execute();
    }

    /// Subscribe to `channel` with `params`, decoding bodies with serde.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotConnected` unless Connected
    /// - `ClientError::InvalidParameters` if a parameter is not a scalar
    pub fn subscribe(&mut self, channel: &str, params: Params) -> Result<Subscription, ClientError>
    where
        P: DeserializeOwned,
    {
        let subscription = self.client.subscribe(channel, params)?;
        self.execute();
        Ok(subscription)
    }

    /// Subscribe with a custom decoder.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotConnected` unless Connected
    /// - `ClientError::InvalidParameters` if a parameter is not a scalar
    pub fn subscribe_with(
        &mut self,
        channel: &str,
        params: Params,
        decoder: Decoder<P>,
    ) -> Result<Subscription, ClientError> {
        let subscription = self.client.subscribe_with(channel, params, decoder)?;
        self.execute();
        Ok(subscription)
    }

    /// Request `subscription` again after a reconnect.
    ///
    /// # Errors
    ///
    /// See [`Client::resubscribe`].
    pub fn resubscribe(&mut self, subscription: &Subscription) -> Result<(), ClientError> {
        self.client.resubscribe(subscription)?;
        self.execute();
        Ok(())
    }

    /// Invoke `action` on a subscribed channel.
    ///
    /// # Errors
    ///
    /// See [`Client::perform`].
    pub fn perform(
        &mut self,
        subscription: &Subscription,
        action: &str,
        params: &Params,
    ) -> Result<(), ClientError> {
        self.client.perform(subscription, action, params)?;
        self.execute();
        Ok(())
    }

    /// Close `subscription`.
    ///
    /// # Errors
    ///
    /// See [`Client::unsubscribe`].
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> Result<(), ClientError> {
        self.client.unsubscribe(subscription)?;
        self.execute();
        Ok(())
    }

    /// Pop an already queued event without waiting.
    pub fn try_next_event(&mut self) -> Option<SessionEvent<P>> {
        self.events.pop_front()
    }

    /// Wait for the next event.
    ///
    /// Drives the session while waiting: open results, inbound frames, the
    /// reconnect timer and the maintenance tick are all processed here.
    /// Cancel safe: inputs are only consumed when they are fully processed.
    pub async fn next_event(&mut self) -> SessionEvent<P> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return event;
            }

            let input = tokio::select! {
                Some(signal) = self.signals_rx.recv() => Input::Signal(signal),
                (attempt, event) = recv_link(&mut self.link) => Input::Link(attempt, event),
                timer = wait_timer(&mut self.timer) => Input::Timer(timer),
                _ = self.tick.tick() => Input::Tick,
            };

            self.handle_input(input);
        }
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::Signal(Signal::Opened { attempt, result }) => {
                if self.opening.as_ref().is_some_and(|(a, _)| *a == attempt) {
                    self.opening = None;
                }
                match result {
                    Ok(link) if self.client.current_attempt() == Some(attempt) => {
                        tracing::debug!(%attempt, "transport open");
                        self.link = Some((attempt, link));
                        self.client.handle_event(ClientEvent::TransportOpened { attempt });
                    },
                    Ok(_stale) => {
                        tracing::debug!(%attempt, "dropping transport opened for stale attempt");
                    },
                    Err(error) => {
                        self.client.handle_event(ClientEvent::TransportFailed { attempt, error });
                    },
                }
            },
            Input::Link(attempt, Some(LinkEvent::Frame(frame))) => {
                self.client.handle_event(ClientEvent::FrameReceived { attempt, frame });
            },
            Input::Link(attempt, closed) => {
                self.drop_link(attempt);
                let error = match closed {
                    Some(LinkEvent::Closed(Some(error))) => error,
                    _ => TransportError::Closed("connection closed".to_string()),
                };
                self.client.handle_event(ClientEvent::TransportFailed { attempt, error });
            },
            Input::Timer(timer) => {
                self.timer = None;
                self.client.handle_event(ClientEvent::ReconnectTimerFired { timer });
            },
            Input::Tick => self.client.handle_event(ClientEvent::Tick),
        }

        self.execute();
    }

    /// Execute everything the client queued.
    fn execute(&mut self) {
        for action in self.client.take_actions() {
            match action {
                ClientAction::OpenTransport(request) => {
                    if let Some((_, handle)) = self.opening.take() {
                        handle.abort();
                    }
                    let attempt = request.attempt;
                    let transport = Arc::clone(&self.transport);
                    let signals = self.signals_tx.clone();
                    let handle = tokio::spawn(async move {
                        let result = transport.open(&request).await;
                        let _ = signals.send(Signal::Opened { attempt, result });
                    });
                    self.opening = Some((attempt, handle.abort_handle()));
                },
                ClientAction::CloseTransport { attempt } => {
                    if let Some((_, handle)) =
                        self.opening.take_if(|(opening, _)| *opening == attempt)
                    {
                        handle.abort();
                    }
                    self.drop_link(attempt);
                },
                ClientAction::Send { attempt, frame } => match &self.link {
                    Some((current, link)) if *current == attempt => {
                        if let Err(error) = link.send(frame) {
                            tracing::warn!(%attempt, %error, "failed to queue frame");
                        }
                    },
                    _ => tracing::warn!(%attempt, "dropping frame for closed transport"),
                },
                ClientAction::ScheduleReconnect { timer, delay } => {
                    let sleep = Box::pin(self.client.env().sleep(delay));
                    self.timer = Some(ReconnectTimer { id: timer, sleep });
                },
                ClientAction::CancelReconnect { timer } => {
                    if self.timer.as_ref().is_some_and(|t| t.id == timer) {
                        self.timer = None;
                    }
                },
                ClientAction::Notify(event) => self.events.push_back(event),
            }
        }
    }

    fn drop_link(&mut self, attempt: AttemptId) {
        if self.link.as_ref().is_some_and(|(current, _)| *current == attempt) {
            self.link = None;
        }
    }
}

async fn recv_link(link: &mut Option<(AttemptId, TransportLink)>) -> (AttemptId, Option<LinkEvent>) {
    match link {
        Some((attempt, link)) => (*attempt, link.recv().await),
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<ReconnectTimer>) -> TimerId {
    match timer {
        Some(timer) => {
            timer.sleep.as_mut().await;
            timer.id
        },
        None => std::future::pending().await,
    }
}
