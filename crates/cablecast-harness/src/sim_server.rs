//! In-process ActionCable server for tests.
//!
//! Speaks the same JSON protocol as a real backend: sends `welcome` on
//! connect, confirms or rejects subscriptions, and echoes `message` commands
//! as broadcasts to every subscriber of the channel. Fault injection knobs
//! cover refused connections, missing welcomes, rejected channels, dropped
//! transports and server-initiated disconnects.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! await point.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use cablecast_client::{LinkEvent, TransportLink};
use cablecast_core::{ConnectRequest, TransportError};
use cablecast_proto::{ChannelIdentifier, Command, Frame, ServerMessage};
use serde_json::Value;
use tokio::sync::mpsc;

struct SimConnection {
    to_client: mpsc::UnboundedSender<LinkEvent>,
    /// Canonical identifiers this connection is subscribed to
    subscriptions: BTreeSet<String>,
}

#[derive(Default)]
struct ServerState {
    connections: BTreeMap<u64, SimConnection>,
    last_connection: u64,
    open_attempts: usize,
    refuse_opens: usize,
    withhold_welcome: bool,
    echo_disabled: bool,
    rejected_channels: HashSet<String>,
    requests: Vec<ConnectRequest>,
    received: Vec<Command>,
}

/// Simulated ActionCable server.
#[derive(Default)]
pub struct SimServer {
    state: Mutex<ServerState>,
}

impl std::fmt::Debug for SimServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SimServer")
            .field("connections", &state.connections.len())
            .field("open_attempts", &state.open_attempts)
            .finish_non_exhaustive()
    }
}

impl SimServer {
    /// Create a server ready to accept connections.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept a connection for `request`.
    ///
    /// Spawns a task that feeds client frames into the server; the task is
    /// stopped with the returned link and the connection is then forgotten.
    ///
    /// # Errors
    ///
    /// - `TransportError::Refused` while refusals are armed
    pub fn open(self: &Arc<Self>, request: &ConnectRequest) -> Result<TransportLink, TransportError> {
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, mut from_client) = mpsc::unbounded_channel::<Frame>();

        let id = {
            let mut state = self.state();
            state.open_attempts += 1;
            state.requests.push(request.clone());

            if state.refuse_opens > 0 {
                state.refuse_opens -= 1;
                tracing::debug!(attempt = %request.attempt, "refusing simulated connection");
                return Err(TransportError::Refused("simulated refusal".to_string()));
            }

            state.last_connection += 1;
            let id = state.last_connection;
            if !state.withhold_welcome {
                send(&to_client, &ServerMessage::Welcome);
            }
            state.connections.insert(id, SimConnection { to_client, subscriptions: BTreeSet::new() });
            id
        };

        let server = Arc::clone(self);
        let guard = ConnectionGuard { server: Arc::clone(self), id };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            while let Some(frame) = from_client.recv().await {
                server.handle_frame(id, &frame);
            }
        });

        Ok(TransportLink::new(to_server, from_server).with_task(handle.abort_handle()))
    }

    fn handle_frame(&self, id: u64, frame: &Frame) {
        let command = match frame.to_command() {
            Ok(command) => command,
            Err(error) => {
                tracing::warn!(%error, "simulated server got malformed frame");
                return;
            },
        };

        let mut state = self.state();
        if !state.connections.contains_key(&id) {
            return;
        }
        state.received.push(command.clone());

        let Ok(identifier) = ChannelIdentifier::parse(command.identifier()) else {
            return;
        };
        let wire = command.identifier().to_string();

        match &command {
            Command::Subscribe { .. } => {
                let rejected = state.rejected_channels.contains(identifier.channel());
                let Some(conn) = state.connections.get_mut(&id) else { return };
                if rejected {
                    send(&conn.to_client, &ServerMessage::RejectSubscription { identifier: wire });
                } else if conn.subscriptions.insert(identifier.as_wire().to_string()) {
                    send(&conn.to_client, &ServerMessage::ConfirmSubscription { identifier: wire });
                }
            },
            Command::Unsubscribe { .. } => {
                if let Some(conn) = state.connections.get_mut(&id) {
                    conn.subscriptions.remove(identifier.as_wire());
                }
            },
            Command::Message { .. } => {
                let subscribed = state
                    .connections
                    .get(&id)
                    .is_some_and(|c| c.subscriptions.contains(identifier.as_wire()));
                if state.echo_disabled || !subscribed {
                    return;
                }
                if let Some(Ok((_action, params))) = command.action() {
                    broadcast_locked(&state, &identifier, &Value::Object(params));
                }
            },
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.state().refuse_opens = count;
    }

    /// Stop (or resume) sending `welcome` to new connections.
    pub fn withhold_welcome(&self, withhold: bool) {
        self.state().withhold_welcome = withhold;
    }

    /// Reject every subscription to `channel`.
    pub fn reject_channel(&self, channel: &str) {
        self.state().rejected_channels.insert(channel.to_string());
    }

    /// Stop echoing `message` commands as broadcasts.
    pub fn disable_echo(&self) {
        self.state().echo_disabled = true;
    }

    /// Broadcast `body` to every subscriber of `identifier`.
    ///
    /// Returns the number of connections that received it.
    pub fn broadcast(&self, identifier: &ChannelIdentifier, body: Value) -> usize {
        broadcast_locked(&self.state(), identifier, &body)
    }

    /// Send raw text to every connection.
    pub fn send_raw(&self, text: &str) {
        for conn in self.state().connections.values() {
            let _ = conn.to_client.send(LinkEvent::Frame(Frame::new(text)));
        }
    }

    /// Send a `ping` to every connection.
    pub fn ping_all(&self) {
        for conn in self.state().connections.values() {
            send(&conn.to_client, &ServerMessage::Ping { timestamp: Some(1_700_000_000) });
        }
    }

    /// Send `welcome` to every connection (use after withholding).
    pub fn welcome_all(&self) {
        for conn in self.state().connections.values() {
            send(&conn.to_client, &ServerMessage::Welcome);
        }
    }

    /// Send a `disconnect` message and close every connection.
    pub fn disconnect_all(&self, reason: Option<&str>, reconnect: bool) {
        let connections = std::mem::take(&mut self.state().connections);
        for conn in connections.values() {
            send(&conn.to_client, &ServerMessage::Disconnect {
                reason: reason.map(str::to_string),
                reconnect,
            });
            let _ = conn.to_client.send(LinkEvent::Closed(None));
        }
    }

    /// Drop every connection as if the network failed.
    pub fn drop_all(&self) {
        let connections = std::mem::take(&mut self.state().connections);
        for conn in connections.values() {
            let _ = conn.to_client.send(LinkEvent::Closed(Some(TransportError::Closed(
                "dropped by simulation".to_string(),
            ))));
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state().connections.len()
    }

    /// Number of connection attempts, including refused ones.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.state().open_attempts
    }

    /// Connect requests seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.state().requests.clone()
    }

    /// Commands received from clients, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<Command> {
        self.state().received.clone()
    }

    /// Number of connections subscribed to `identifier`.
    #[must_use]
    pub fn subscriber_count(&self, identifier: &ChannelIdentifier) -> usize {
        self.state()
            .connections
            .values()
            .filter(|c| c.subscriptions.contains(identifier.as_wire()))
            .count()
    }
}

struct ConnectionGuard {
    server: Arc<SimServer>,
    id: u64,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.server.state().connections.remove(&self.id);
    }
}

fn send(to_client: &mpsc::UnboundedSender<LinkEvent>, message: &ServerMessage) {
    match Frame::from_message(message) {
        Ok(frame) => {
            let _ = to_client.send(LinkEvent::Frame(frame));
        },
        Err(error) => tracing::warn!(%error, "simulated server failed to encode message"),
    }
}

fn broadcast_locked(state: &ServerState, identifier: &ChannelIdentifier, body: &Value) -> usize {
    let mut delivered = 0;
    for conn in state.connections.values() {
        if conn.subscriptions.contains(identifier.as_wire()) {
            send(&conn.to_client, &ServerMessage::Broadcast {
                identifier: identifier.as_wire().to_string(),
                message: body.clone(),
            });
            delivered += 1;
        }
    }
    delivered
}
