//! Deterministic test harness for the Cablecast client.
//!
//! Implementations of the Environment and Transport traits for reproducible
//! testing without a network:
//!
//! - [`SimEnv`]: Tokio clock (pausable) with a seeded RNG, for async session
//!   tests
//! - [`ManualEnv`]: virtual clock advanced by the test, for driving the
//!   sans-IO client synchronously
//! - [`SimServer`]: in-process ActionCable server with fault injection
//! - [`LoopbackTransport`]: connects sessions to a [`SimServer`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod manual_env;
pub mod sim_env;
pub mod sim_server;
pub mod sim_transport;

pub use manual_env::{ManualEnv, VirtualInstant};
pub use sim_env::SimEnv;
pub use sim_server::SimServer;
pub use sim_transport::LoopbackTransport;
