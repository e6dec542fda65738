//! Sans-IO core of the Cablecast messaging client.
//!
//! Pure state machines with no I/O: the runtime feeds inputs in and executes
//! the actions that come out. Time and randomness come from an
//! [`Environment`], so the same code runs against the system clock in
//! production and a virtual clock in tests.
//!
//! # Components
//!
//! - [`ConnectionManager`]: transport lifecycle and reconnect-with-backoff
//! - [`SubscriptionRegistry`]: caller-owned channel subscriptions, weakly
//!   referenced
//! - [`Router`]: inbound demultiplexing and outbound action encoding
//! - [`Client`]: the three composed into one session

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod client;
pub mod connection;
pub mod env;
pub mod error;
pub mod event;
pub mod router;
pub mod subscription;

pub use backoff::BackoffPolicy;
pub use client::{Client, ClientConfig};
pub use connection::{
    AlwaysReconnect, AttemptId, ConnectionAction, ConnectionConfig, ConnectionManager,
    ConnectionState, MaxAttempts, ReconnectContext, ReconnectHook, TimerId,
};
pub use env::Environment;
pub use error::{ClientError, DecodeError, DisconnectReason, SubscriptionRejected, TransportError};
pub use event::{ClientAction, ClientEvent, ConnectRequest, SessionEvent};
pub use router::{Decoder, Dispatch, Router, decode_json};
pub use subscription::{Subscription, SubscriptionId, SubscriptionRegistry, SubscriptionState};
