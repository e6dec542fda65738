//! Property tests: arbitrary input sequences against the client.

mod common;

use std::{collections::BTreeSet, time::Duration};

use cablecast_core::{
    AttemptId, ClientAction, ClientEvent, ConnectionState, Subscription, SubscriptionState,
    TimerId, TransportError,
};
use cablecast_proto::{Frame, ServerMessage};
use common::{Driver, chat_body, identifier, params};
use proptest::prelude::*;
use serde_json::json;

#[derive(Debug, Clone)]
enum Op {
    Connect,
    Disconnect,
    /// Report the transport of the n-th most recent attempt as open
    Opened(usize),
    /// Report the transport of the n-th most recent attempt as failed
    Failed(usize),
    Welcome(usize),
    /// Fire the n-th most recent timer, stale or not
    FireTimer(usize),
    Tick(u64),
    Subscribe(u8),
    Confirm(u8),
    Broadcast(u8),
    Perform(u8),
    ServerDisconnect(bool),
    Garbage,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Connect),
        Just(Op::Disconnect),
        (0usize..3).prop_map(Op::Opened),
        (0usize..3).prop_map(Op::Failed),
        (0usize..3).prop_map(Op::Welcome),
        (0usize..3).prop_map(Op::FireTimer),
        (0u64..15_000).prop_map(Op::Tick),
        (0u8..3).prop_map(Op::Subscribe),
        (0u8..3).prop_map(Op::Confirm),
        (0u8..3).prop_map(Op::Broadcast),
        (0u8..3).prop_map(Op::Perform),
        any::<bool>().prop_map(Op::ServerDisconnect),
        Just(Op::Garbage),
    ]
}

fn nth_recent<T: Copy>(items: &[T], n: usize) -> Option<T> {
    items.iter().rev().nth(n).copied()
}

struct Model {
    driver: Driver,
    live_transports: BTreeSet<AttemptId>,
    pending_timers: BTreeSet<TimerId>,
    attempts: Vec<AttemptId>,
    timers: Vec<TimerId>,
    handles: Vec<Option<Subscription>>,
}

impl Model {
    fn new() -> Self {
        Self {
            driver: Driver::new(),
            live_transports: BTreeSet::new(),
            pending_timers: BTreeSet::new(),
            attempts: Vec::new(),
            timers: Vec::new(),
            handles: vec![None, None, None],
        }
    }

    fn drain(&mut self) {
        for action in self.driver.client.take_actions() {
            match action {
                ClientAction::OpenTransport(request) => {
                    self.live_transports.insert(request.attempt);
                    self.attempts.push(request.attempt);
                },
                ClientAction::CloseTransport { attempt } => {
                    self.live_transports.remove(&attempt);
                },
                ClientAction::ScheduleReconnect { timer, .. } => {
                    self.pending_timers.insert(timer);
                    self.timers.push(timer);
                },
                ClientAction::CancelReconnect { timer } => {
                    self.pending_timers.remove(&timer);
                },
                ClientAction::Send { .. } | ClientAction::Notify(_) => {},
            }
        }
    }

    fn deliver(&mut self, attempt: AttemptId, message: &ServerMessage) {
        let frame = Frame::from_message(message).unwrap();
        self.driver.client.handle_event(ClientEvent::FrameReceived { attempt, frame });
    }

    fn apply(&mut self, op: &Op) {
        let current = self.driver.client.current_attempt();
        let client = &mut self.driver.client;
        match op {
            Op::Connect => client.connect(),
            Op::Disconnect => client.disconnect(),
            Op::Opened(n) => {
                if let Some(attempt) = nth_recent(&self.attempts, *n) {
                    client.handle_event(ClientEvent::TransportOpened { attempt });
                }
            },
            Op::Failed(n) => {
                if let Some(attempt) = nth_recent(&self.attempts, *n) {
                    let error = TransportError::Closed("prop".into());
                    client.handle_event(ClientEvent::TransportFailed { attempt, error });
                }
            },
            Op::Welcome(n) => {
                if let Some(attempt) = nth_recent(&self.attempts, *n) {
                    self.deliver(attempt, &ServerMessage::Welcome);
                }
            },
            Op::FireTimer(n) => {
                if let Some(timer) = nth_recent(&self.timers, *n) {
                    self.pending_timers.remove(&timer);
                    client.handle_event(ClientEvent::ReconnectTimerFired { timer });
                }
            },
            Op::Tick(ms) => {
                self.driver.env.advance(Duration::from_millis(*ms));
                client.handle_event(ClientEvent::Tick);
            },
            Op::Subscribe(slot) => {
                let slot = usize::from(*slot);
                if let Ok(sub) = client.subscribe("room", params(json!({ "slot": slot }))) {
                    self.handles[slot] = Some(sub);
                }
            },
            Op::Confirm(slot) => {
                if let Some(attempt) = current {
                    let id = identifier("room", json!({ "slot": usize::from(*slot) }));
                    let message =
                        ServerMessage::ConfirmSubscription { identifier: id.as_wire().to_string() };
                    self.deliver(attempt, &message);
                }
            },
            Op::Broadcast(slot) => {
                if let Some(attempt) = current {
                    let id = identifier("room", json!({ "slot": usize::from(*slot) }));
                    let message = ServerMessage::Broadcast {
                        identifier: id.as_wire().to_string(),
                        message: chat_body("a", "b"),
                    };
                    self.deliver(attempt, &message);
                }
            },
            Op::Perform(slot) => {
                if let Some(sub) = &self.handles[usize::from(*slot)] {
                    let state = client.subscription_state(sub);
                    let result = client.perform(sub, "talk", &params(chat_body("a", "b")));
                    assert_eq!(result.is_ok(), state == Some(SubscriptionState::Subscribed));
                }
            },
            Op::ServerDisconnect(reconnect) => {
                if let Some(attempt) = current {
                    let message = ServerMessage::Disconnect { reason: None, reconnect: *reconnect };
                    self.deliver(attempt, &message);
                }
            },
            Op::Garbage => {
                if let Some(attempt) = current {
                    client.handle_event(ClientEvent::FrameReceived {
                        attempt,
                        frame: Frame::new("{\"type\":"),
                    });
                }
            },
        }
        self.drain();
    }

    fn check(&self) {
        let client = &self.driver.client;
        let state = client.connection_state();

        assert!(self.live_transports.len() <= 1, "more than one live transport");
        assert_eq!(self.live_transports.iter().next().copied(), client.current_attempt());
        assert_eq!(
            matches!(state, ConnectionState::Connecting | ConnectionState::Connected),
            client.current_attempt().is_some()
        );

        assert!(self.pending_timers.len() <= 1, "more than one pending timer");
        assert_eq!(!self.pending_timers.is_empty(), state == ConnectionState::Reconnecting);

        if state != ConnectionState::Connected {
            for sub in self.handles.iter().flatten() {
                assert_ne!(client.subscription_state(sub), Some(SubscriptionState::Subscribed));
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_client_invariants_hold(ops in prop::collection::vec(op(), 1..80)) {
        let mut model = Model::new();
        for op in &ops {
            model.apply(op);
            model.check();
        }
    }
}
