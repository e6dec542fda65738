//! Fuzz target for the client state machine
//!
//! # Strategy
//!
//! Drives a client with arbitrary interleavings of caller operations,
//! transport events, timer firings, clock jumps and raw frames, including
//! events addressed to stale attempts and stale timers.
//!
//! # Invariants
//!
//! - No panic on any input sequence
//! - At most one transport attempt is open at a time
//! - A reconnect timer is pending iff the state is Reconnecting
//! - No subscription is Subscribed unless the client is Connected

#![no_main]

use std::{collections::BTreeSet, time::Duration};

use arbitrary::Arbitrary;
use cablecast_core::{
    AttemptId, Client, ClientAction, ClientConfig, ClientEvent, ConnectionState, Subscription,
    SubscriptionState, TimerId, TransportError,
};
use cablecast_harness::ManualEnv;
use cablecast_proto::{Frame, Params};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Connect,
    Disconnect,
    Opened { back: u8 },
    Failed { back: u8 },
    Frame { back: u8, text: String },
    Welcome { back: u8 },
    Confirm { slot: u8 },
    FireTimer { back: u8 },
    Tick { millis: u16 },
    Subscribe { slot: u8 },
    Perform { slot: u8 },
    Unsubscribe { slot: u8 },
    DropHandle { slot: u8 },
}

fn nth_back<T: Copy>(items: &[T], back: u8) -> Option<T> {
    items.iter().rev().nth(usize::from(back % 4)).copied()
}

fn slot_params(slot: u8) -> Params {
    let mut params = Params::new();
    params.insert("slot".to_string(), Value::from(slot % 4));
    params
}

fn deliver(client: &mut Client<Value, ManualEnv>, attempt: AttemptId, text: &str) {
    client.handle_event(ClientEvent::FrameReceived { attempt, frame: Frame::new(text) });
}

fuzz_target!(|ops: Vec<Op>| {
    let Ok(config) = ClientConfig::new("wss://fuzz.test/cable") else {
        return;
    };
    let env = ManualEnv::new();
    let mut client: Client<Value, ManualEnv> = Client::new(config, env.clone());

    let mut attempts: Vec<AttemptId> = Vec::new();
    let mut timers: Vec<TimerId> = Vec::new();
    let mut open: BTreeSet<AttemptId> = BTreeSet::new();
    let mut pending: BTreeSet<TimerId> = BTreeSet::new();
    let mut handles: [Option<Subscription>; 4] = Default::default();

    for op in ops {
        match op {
            Op::Connect => client.connect(),
            Op::Disconnect => client.disconnect(),
            Op::Opened { back } => {
                if let Some(attempt) = nth_back(&attempts, back) {
                    client.handle_event(ClientEvent::TransportOpened { attempt });
                }
            },
            Op::Failed { back } => {
                if let Some(attempt) = nth_back(&attempts, back) {
                    let error = TransportError::Io("fuzz".to_string());
                    client.handle_event(ClientEvent::TransportFailed { attempt, error });
                }
            },
            Op::Frame { back, text } => {
                if let Some(attempt) = nth_back(&attempts, back) {
                    deliver(&mut client, attempt, &text);
                }
            },
            Op::Welcome { back } => {
                if let Some(attempt) = nth_back(&attempts, back) {
                    deliver(&mut client, attempt, r#"{"type":"welcome"}"#);
                }
            },
            Op::Confirm { slot } => {
                if let (Some(attempt), Some(sub)) =
                    (client.current_attempt(), &handles[usize::from(slot % 4)])
                {
                    let identifier = Value::String(sub.identifier().as_wire().to_string());
                    let text = format!(r#"{{"type":"confirm_subscription","identifier":{identifier}}}"#);
                    deliver(&mut client, attempt, &text);
                }
            },
            Op::FireTimer { back } => {
                if let Some(timer) = nth_back(&timers, back) {
                    pending.remove(&timer);
                    client.handle_event(ClientEvent::ReconnectTimerFired { timer });
                }
            },
            Op::Tick { millis } => {
                env.advance(Duration::from_millis(u64::from(millis)));
                client.handle_event(ClientEvent::Tick);
            },
            Op::Subscribe { slot } => {
                if let Ok(sub) = client.subscribe("room", slot_params(slot)) {
                    handles[usize::from(slot % 4)] = Some(sub);
                }
            },
            Op::Perform { slot } => {
                if let Some(sub) = &handles[usize::from(slot % 4)] {
                    let _ = client.perform(sub, "talk", &Params::new());
                }
            },
            Op::Unsubscribe { slot } => {
                if let Some(sub) = &handles[usize::from(slot % 4)] {
                    let _ = client.unsubscribe(sub);
                }
            },
            Op::DropHandle { slot } => handles[usize::from(slot % 4)] = None,
        }

        for action in client.take_actions() {
            match action {
                ClientAction::OpenTransport(request) => {
                    attempts.push(request.attempt);
                    open.insert(request.attempt);
                },
                ClientAction::CloseTransport { attempt } => {
                    open.remove(&attempt);
                },
                ClientAction::ScheduleReconnect { timer, .. } => {
                    timers.push(timer);
                    pending.insert(timer);
                },
                ClientAction::CancelReconnect { timer } => {
                    pending.remove(&timer);
                },
                ClientAction::Send { .. } | ClientAction::Notify(_) => {},
            }
        }

        let state = client.connection_state();
        assert!(open.len() <= 1, "two transports open");
        assert_eq!(open.iter().next().copied(), client.current_attempt());
        assert!(pending.len() <= 1, "two reconnect timers pending");
        assert_eq!(!pending.is_empty(), state == ConnectionState::Reconnecting);
        if state != ConnectionState::Connected {
            for sub in handles.iter().flatten() {
                assert_ne!(client.subscription_state(sub), Some(SubscriptionState::Subscribed));
            }
        }
    }
});
