//! Async runtime for the Cablecast messaging client.
//!
//! The protocol logic lives in the sans-IO [`cablecast_core::Client`]. This
//! crate supplies the I/O around it:
//!
//! - [`Session`]: the designated execution context. Owns the client, the
//!   transport link, the reconnect timer and the ordered event queue.
//! - [`Transport`]: seam for opening a transport; [`WebSocketTransport`] is
//!   the production implementation (feature `websocket`).
//! - [`SystemEnv`]: system clock and OS randomness.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod session;
pub mod system_env;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use cablecast_core::{
    ClientConfig, ClientError, ConnectionConfig, ConnectionState, DecodeError, DisconnectReason,
    MaxAttempts, ReconnectContext, ReconnectHook, SessionEvent, Subscription, SubscriptionState,
    TransportError,
};
pub use session::{DEFAULT_TICK_INTERVAL, Session, SessionConfig};
pub use system_env::SystemEnv;
pub use transport::{LinkEvent, Transport, TransportLink};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
