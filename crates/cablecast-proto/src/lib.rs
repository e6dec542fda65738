//! Wire format for the Cablecast messaging client.
//!
//! The backend speaks the ActionCable protocol: JSON objects carried in
//! WebSocket text frames. This crate is pure data and codec logic with no
//! I/O, shared by the client state machines and the test harness.
//!
//! # Components
//!
//! - [`ChannelIdentifier`]: canonical (channel name, parameters) identity
//! - [`Command`]: outbound `subscribe`/`unsubscribe`/`message` commands
//! - [`ServerMessage`]: inbound welcome, ping, disconnect, confirmation,
//!   rejection and broadcast messages
//! - [`Frame`]: one text frame on the transport

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod command;
mod errors;
mod frame;
mod identifier;
mod message;

pub use command::Command;
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, MAX_FRAME_SIZE};
pub use identifier::{ChannelIdentifier, Params};
pub use message::ServerMessage;
