//! Chat room on top of the Cablecast session runtime.
//!
//! [`ChatRoom`] joins one room of the `ChatChannel` channel, keeps the
//! history of received lines and sends the user's lines with the `talk`
//! action. It knows nothing about terminals; the `cablecast-chat` binary does
//! the rendering.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod message;
pub mod room;

pub use message::{ChatHistory, ChatMessage};
pub use room::{ACTION, CHANNEL, ChatError, ChatRoom, ChatUpdate};
