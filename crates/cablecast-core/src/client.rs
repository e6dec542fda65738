//! Client: Connection Manager, subscription registry and Message Router
//! composed into one sans-IO session.
//!
//! Caller operations (`connect`, `subscribe`, `perform`, ...) and transport
//! inputs ([`ClientEvent`]) queue [`ClientAction`]s. The runtime drains them
//! with [`Client::take_actions`] and executes them in order.

use std::{collections::BTreeMap, fmt};

use cablecast_proto::{ChannelIdentifier, Command, Frame, Params, ServerMessage};
use serde::de::DeserializeOwned;

use crate::{
    connection::{
        AttemptId, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState,
        ReconnectHook,
    },
    env::Environment,
    error::{ClientError, SubscriptionRejected},
    event::{ClientAction, ClientEvent, ConnectRequest, SessionEvent},
    router::{Decoder, Dispatch, Router, decode_json},
    subscription::{Lookup, Released, Subscription, SubscriptionState},
};

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    endpoint: String,
    headers: BTreeMap<String, String>,
    connection: ConnectionConfig,
}

impl ClientConfig {
    /// Configuration for `endpoint` with default connection settings.
    ///
    /// `http://` and `https://` are normalized to `ws://` and `wss://`.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidEndpoint` for any other scheme or a missing
    ///   host
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: normalize_endpoint(endpoint.as_ref())?,
            headers: BTreeMap::new(),
            connection: ConnectionConfig::default(),
        })
    }

    /// Add a header sent with every upgrade request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the connection settings.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Normalized endpoint URI.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upgrade request headers.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Connection settings.
    #[must_use]
    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }
}

fn normalize_endpoint(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim();
    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return Err(ClientError::InvalidEndpoint(raw.to_string()));
    };

    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        _ => return Err(ClientError::InvalidEndpoint(raw.to_string())),
    };

    if rest.is_empty() || rest.starts_with('/') {
        return Err(ClientError::InvalidEndpoint(raw.to_string()));
    }

    Ok(format!("{scheme}://{rest}"))
}

/// Sans-IO messaging session.
///
/// Generic over the payload type `P` delivered to subscribers and the
/// [`Environment`] providing time and jitter entropy.
pub struct Client<P, E: Environment> {
    env: E,
    config: ClientConfig,
    connection: ConnectionManager<E::Instant>,
    router: Router<P>,
    actions: Vec<ClientAction<P>>,
}

impl<P, E: Environment> fmt::Debug for Client<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.config.endpoint)
            .field("connection", &self.connection)
            .field("subscriptions", self.router.subscriptions())
            .field("queued_actions", &self.actions.len())
            .finish()
    }
}

impl<P, E: Environment> Client<P, E> {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig, env: E) -> Self {
        let connection = ConnectionManager::new(config.connection.clone());
        Self { env, config, connection, router: Router::new(), actions: Vec::new() }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Environment in use.
    #[must_use]
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Attempt that currently owns the transport.
    #[must_use]
    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.connection.current_attempt()
    }

    /// Replace the reconnect hook.
    pub fn set_reconnect_hook(&mut self, hook: impl ReconnectHook + 'static) {
        self.connection.set_reconnect_hook(hook);
    }

    /// Drain queued actions in the order they were produced.
    pub fn take_actions(&mut self) -> Vec<ClientAction<P>> {
        std::mem::take(&mut self.actions)
    }

    /// Begin establishing the transport. Idempotent while connecting or
    /// connected.
    pub fn connect(&mut self) {
        let actions = self.connection.connect(self.env.now());
        self.apply(actions);
    }

    /// Close the transport and cancel any pending reconnect.
    pub fn disconnect(&mut self) {
        let actions = self.connection.disconnect();
        self.apply(actions);
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
        self.subscribe_with(channel, params, decode_json::<P>)
    }

    /// Subscribe to `channel` with `params` and a custom decoder.
    ///
    /// Subscribing again to an open channel identity returns another handle
    /// to the same subscription.
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
        let attempt = self.require_connected()?;
        let identifier = ChannelIdentifier::new(channel, params)?;

        match self.router.subscriptions_mut().lookup(&identifier) {
            Lookup::Live(id) => {
                if let Some(handle) = self.router.subscriptions().handle(id) {
                    self.request_if_needed(&handle, attempt)?;
                    return Ok(handle);
                }
            },
            Lookup::Released(released) => self.release(&released),
            Lookup::Missing => {},
        }

        let handle = self.router.subscriptions_mut().insert(identifier, decoder);
        tracing::debug!(subscription = %handle.id(), identifier = %handle.identifier(), "subscribing");
        self.request(&handle, attempt)?;
        Ok(handle)
    }

    /// Request `subscription` again after a reconnect.
    ///
    /// No-op if it is already subscribed or already requested on this
    /// connection.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownSubscription` if the handle is not ours
    /// - `ClientError::SubscriptionClosed` if unsubscribed or rejected
    /// - `ClientError::NotConnected` unless Connected
    pub fn resubscribe(&mut self, subscription: &Subscription) -> Result<(), ClientError> {
        let state = self.state_of(subscription)?;
        if state.is_terminal() {
            return Err(ClientError::SubscriptionClosed { state });
        }

        let attempt = self.require_connected()?;
        self.request_if_needed(subscription, attempt)
    }

    /// Invoke `action` on a subscribed channel. Queues exactly one frame.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownSubscription` if the handle is not ours
    /// - `ClientError::NotSubscribed` unless the subscription is Subscribed
    /// - `ClientError::InvalidParameters` if the frame cannot be built
    pub fn perform(
        &mut self,
        subscription: &Subscription,
        action: &str,
        params: &Params,
    ) -> Result<(), ClientError> {
        let state = self.state_of(subscription)?;
        if state != SubscriptionState::Subscribed {
            return Err(ClientError::NotSubscribed { state });
        }

        let attempt = self.require_connected()?;
        let frame = Router::<P>::encode(subscription.identifier(), action, params)?;
        self.actions.push(ClientAction::Send { attempt, frame });
        Ok(())
    }

    /// Close `subscription`. Idempotent on closed subscriptions.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownSubscription` if the handle is not ours
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> Result<(), ClientError> {
        self.state_of(subscription)?;

        let Some(requested_on) = self.router.subscriptions_mut().close(subscription.id()) else {
            return Ok(());
        };

        tracing::debug!(subscription = %subscription.id(), "unsubscribed");
        if let Some(attempt) = requested_on.filter(|a| self.is_connected_on(*a)) {
            self.send_command(attempt, &Command::unsubscribe(subscription.identifier()));
        }
        Ok(())
    }

    /// State of `subscription`, if it belongs to this client.
    #[must_use]
    pub fn subscription_state(&self, subscription: &Subscription) -> Option<SubscriptionState> {
        self.state_of(subscription).ok()
    }

    /// Feed one transport-side input.
    pub fn handle_event(&mut self, event: ClientEvent) {
        let now = self.env.now();

        match event {
            ClientEvent::TransportOpened { attempt } => {
                let actions = self.connection.transport_opened(attempt, now);
                self.apply(actions);
            },
            ClientEvent::TransportFailed { attempt, error } => {
                let actions = self.connection.transport_failed(attempt, error, self.env.random_u64());
                self.apply(actions);
            },
            ClientEvent::FrameReceived { attempt, frame } => self.handle_frame(attempt, &frame),
            ClientEvent::ReconnectTimerFired { timer } => {
                let actions = self.connection.reconnect_timer_fired(timer, now);
                self.apply(actions);
            },
            ClientEvent::Tick => {
                let actions = self.connection.tick(now, self.env.random_u64());
                self.apply(actions);

                for released in self.router.subscriptions_mut().sweep() {
                    self.release(&released);
                }
            },
        }
    }

    fn handle_frame(&mut self, attempt: AttemptId, frame: &Frame) {
        if self.connection.current_attempt() != Some(attempt) {
            tracing::debug!(%attempt, "ignoring frame from stale attempt");
            return;
        }

        let message = match frame.to_message() {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%attempt, %error, "dropping undecodable frame");
                return;
            },
        };

        let actions =
            self.connection.handle_message(attempt, &message, self.env.now(), self.env.random_u64());
        self.apply(actions);

        if message.identifier().is_some() && self.is_connected_on(attempt) {
            self.route(attempt, &message);
        }
    }

    fn route(&mut self, attempt: AttemptId, message: &ServerMessage) {
        match self.router.dispatch(attempt, message) {
            Dispatch::Received { subscription, identifier, result } => {
                if let Err(error) = &result {
                    tracing::warn!(%subscription, %error, "undecodable broadcast");
                }
                self.notify(SessionEvent::Received { subscription, identifier, result });
            },
            Dispatch::Confirmed { subscription, identifier } => {
                tracing::debug!(%subscription, %identifier, "subscription confirmed");
                self.notify(SessionEvent::Subscribed { subscription, identifier });
            },
            Dispatch::Rejected { subscription, identifier } => {
                tracing::warn!(%subscription, %identifier, "subscription rejected");
                self.notify(SessionEvent::Rejected {
                    subscription,
                    error: SubscriptionRejected { identifier },
                });
            },
            Dispatch::Released(released) => {
                if released.requested_on == Some(attempt) {
                    self.send_command(attempt, &Command::unsubscribe(&released.identifier));
                }
            },
            Dispatch::Dropped => {},
        }
    }

    fn apply(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::WillConnect => self.notify(SessionEvent::WillConnect),
                ConnectionAction::Open { attempt } => {
                    self.actions.push(ClientAction::OpenTransport(ConnectRequest {
                        attempt,
                        endpoint: self.config.endpoint.clone(),
                        headers: self.config.headers.clone(),
                    }));
                },
                ConnectionAction::Close { attempt } => {
                    self.actions.push(ClientAction::CloseTransport { attempt });
                },
                ConnectionAction::Connected { .. } => self.notify(SessionEvent::Connected),
                ConnectionAction::Disconnected { reason } => {
                    self.router.subscriptions_mut().transport_lost();
                    self.notify(SessionEvent::Disconnected { reason });
                },
                ConnectionAction::ScheduleReconnect { timer, delay, attempt } => {
                    self.actions.push(ClientAction::ScheduleReconnect { timer, delay });
                    self.notify(SessionEvent::ReconnectScheduled { attempt, delay });
                },
                ConnectionAction::CancelReconnect { timer } => {
                    self.actions.push(ClientAction::CancelReconnect { timer });
                },
                ConnectionAction::ReconnectHalted => self.notify(SessionEvent::ReconnectHalted),
            }
        }
    }

    fn notify(&mut self, event: SessionEvent<P>) {
        self.actions.push(ClientAction::Notify(event));
    }

    fn require_connected(&self) -> Result<AttemptId, ClientError> {
        match (self.connection.state(), self.connection.current_attempt()) {
            (ConnectionState::Connected, Some(attempt)) => Ok(attempt),
            (state, _) => Err(ClientError::NotConnected { state }),
        }
    }

    fn is_connected_on(&self, attempt: AttemptId) -> bool {
        self.connection.state() == ConnectionState::Connected
            && self.connection.current_attempt() == Some(attempt)
    }

    fn state_of(&self, subscription: &Subscription) -> Result<SubscriptionState, ClientError> {
        let registry = self.router.subscriptions();
        if !registry.owns(subscription) {
            return Err(ClientError::UnknownSubscription(subscription.id()));
        }
        registry.state(subscription.id()).ok_or(ClientError::UnknownSubscription(subscription.id()))
    }

    fn request_if_needed(
        &mut self,
        subscription: &Subscription,
        attempt: AttemptId,
    ) -> Result<(), ClientError> {
        let registry = self.router.subscriptions();
        let pending = registry.state(subscription.id()) == Some(SubscriptionState::Pending);
        if pending && registry.requested_on(subscription.id()) != Some(attempt) {
            tracing::debug!(subscription = %subscription.id(), "re-requesting subscription");
            self.request(subscription, attempt)?;
        }
        Ok(())
    }

    fn request(&mut self, subscription: &Subscription, attempt: AttemptId) -> Result<(), ClientError> {
        let frame = Frame::from_command(&Command::subscribe(subscription.identifier()))?;
        self.actions.push(ClientAction::Send { attempt, frame });
        self.router.subscriptions_mut().mark_requested(subscription.id(), attempt);
        Ok(())
    }

    fn release(&mut self, released: &Released) {
        tracing::debug!(subscription = %released.id, "subscription released by caller");
        if let Some(attempt) = released.requested_on.filter(|a| self.is_connected_on(*a)) {
            self.send_command(attempt, &Command::unsubscribe(&released.identifier));
        }
    }

    fn send_command(&mut self, attempt: AttemptId, command: &Command) {
        match Frame::from_command(command) {
            Ok(frame) => self.actions.push(ClientAction::Send { attempt, frame }),
            Err(error) => tracing::warn!(%error, "failed to encode command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_schemes_are_normalized() {
        assert_eq!(ClientConfig::new("wss://host/cable").unwrap().endpoint(), "wss://host/cable");
        assert_eq!(ClientConfig::new("https://host/cable").unwrap().endpoint(), "wss://host/cable");
        assert_eq!(ClientConfig::new(" http://host:3000 ").unwrap().endpoint(), "ws://host:3000");
    }

    #[test]
    fn invalid_endpoints_are_rejected() {
        for raw in ["ftp://host", "host/cable", "ws://", "wss:///cable", ""] {
            assert!(
                matches!(ClientConfig::new(raw), Err(ClientError::InvalidEndpoint(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn headers_accumulate() {
        let config = ClientConfig::new("ws://host")
            .unwrap()
            .with_header("Authorization", "Bearer t")
            .with_header("Origin", "https://host");

        assert_eq!(config.headers().len(), 2);
        assert_eq!(config.headers()["Authorization"], "Bearer t");
    }
}
