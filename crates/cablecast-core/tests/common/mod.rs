//! Shared driver for client tests: executes client actions against a fake
//! transport and records everything observable.

#![allow(dead_code)]

use std::time::Duration;

use cablecast_core::{
    AttemptId, Client, ClientAction, ClientConfig, ClientEvent, ConnectionConfig, SessionEvent,
    TimerId, TransportError, backoff::BackoffPolicy,
};
use cablecast_harness::ManualEnv;
use cablecast_proto::{ChannelIdentifier, Command, Frame, Params, ServerMessage};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Line {
    pub name: String,
    pub message: String,
}

pub fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap()
}

pub fn identifier(channel: &str, value: Value) -> ChannelIdentifier {
    ChannelIdentifier::new(channel, params(value)).unwrap()
}

pub struct Driver {
    pub client: Client<Line, ManualEnv>,
    pub env: ManualEnv,
    pub events: Vec<SessionEvent<Line>>,
    pub sent: Vec<(AttemptId, Command)>,
    pub opened: Vec<AttemptId>,
    pub closed: Vec<AttemptId>,
    pub scheduled: Vec<(TimerId, Duration)>,
    pub cancelled: Vec<TimerId>,
}

impl Driver {
    pub fn new() -> Self {
        let connection = ConnectionConfig {
            backoff: BackoffPolicy::default().without_jitter(),
            ..ConnectionConfig::default()
        };
        let config = ClientConfig::new("wss://example.test/cable")
            .unwrap()
            .with_header("Authorization", "Bearer token")
            .with_connection(connection);
        let env = ManualEnv::new();
        Self {
            client: Client::new(config, env.clone()),
            env,
            events: Vec::new(),
            sent: Vec::new(),
            opened: Vec::new(),
            closed: Vec::new(),
            scheduled: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    pub fn pump(&mut self) {
        for action in self.client.take_actions() {
            match action {
                ClientAction::OpenTransport(request) => self.opened.push(request.attempt),
                ClientAction::CloseTransport { attempt } => self.closed.push(attempt),
                ClientAction::Send { attempt, frame } => {
                    self.sent.push((attempt, frame.to_command().unwrap()));
                },
                ClientAction::ScheduleReconnect { timer, delay } => self.scheduled.push((timer, delay)),
                ClientAction::CancelReconnect { timer } => self.cancelled.push(timer),
                ClientAction::Notify(event) => self.events.push(event),
            }
        }
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent<Line>> {
        self.pump();
        std::mem::take(&mut self.events)
    }

    pub fn take_sent(&mut self) -> Vec<Command> {
        self.pump();
        std::mem::take(&mut self.sent).into_iter().map(|(_, c)| c).collect()
    }

    /// Connect, open the transport and deliver `welcome`.
    pub fn connect(&mut self) -> AttemptId {
        self.client.connect();
        self.pump();
        let attempt = self.client.current_attempt().unwrap();
        self.open(attempt);
        self.deliver(&ServerMessage::Welcome);
        attempt
    }

    pub fn open(&mut self, attempt: AttemptId) {
        self.client.handle_event(ClientEvent::TransportOpened { attempt });
        self.pump();
    }

    pub fn deliver(&mut self, message: &ServerMessage) {
        let attempt = self.client.current_attempt().unwrap();
        self.deliver_on(attempt, message);
    }

    pub fn deliver_on(&mut self, attempt: AttemptId, message: &ServerMessage) {
        let frame = Frame::from_message(message).unwrap();
        self.deliver_raw(attempt, frame);
    }

    pub fn deliver_raw(&mut self, attempt: AttemptId, frame: Frame) {
        self.client.handle_event(ClientEvent::FrameReceived { attempt, frame });
        self.pump();
    }

    pub fn fail(&mut self, error: TransportError) {
        let attempt = self.client.current_attempt().unwrap();
        self.client.handle_event(ClientEvent::TransportFailed { attempt, error });
        self.pump();
    }

    pub fn fire(&mut self, timer: TimerId) {
        self.client.handle_event(ClientEvent::ReconnectTimerFired { timer });
        self.pump();
    }

    pub fn tick_after(&mut self, elapsed: Duration) {
        self.env.advance(elapsed);
        self.client.handle_event(ClientEvent::Tick);
        self.pump();
    }

    pub fn last_timer(&self) -> TimerId {
        self.scheduled.last().unwrap().0
    }

    pub fn confirm(&mut self, identifier: &ChannelIdentifier) {
        self.deliver(&ServerMessage::ConfirmSubscription { identifier: identifier.as_wire().to_string() });
    }

    pub fn broadcast(&mut self, identifier: &ChannelIdentifier, body: Value) {
        self.deliver(&ServerMessage::Broadcast { identifier: identifier.as_wire().to_string(), message: body });
    }
}

pub fn chat_body(name: &str, message: &str) -> Value {
    json!({ "name": name, "message": message })
}
