//! Error types for the Cablecast session core.
//!
//! Strongly-typed errors for each failure class: transport errors (recovered
//! by the reconnect policy), decode errors (per message, surfaced to the
//! subscriber), subscription rejections (terminal for one subscription) and
//! precondition errors (returned synchronously on caller misuse).

use std::{fmt, io, time::Duration};

use cablecast_proto::{ChannelIdentifier, ProtocolError};
use thiserror::Error;

use crate::{
    connection::ConnectionState,
    subscription::{SubscriptionId, SubscriptionState},
};

/// Misuse of the client API. Returned synchronously, never queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Operation requires an established connection
    #[error("not connected: connection is {state:?}")]
    NotConnected {
        /// Connection state when the call was made
        state: ConnectionState,
    },

    /// Action attempted on a subscription that is not confirmed
    #[error("not subscribed: subscription is {state:?}")]
    NotSubscribed {
        /// Subscription state when the call was made
        state: SubscriptionState,
    },

    /// Subscription was unsubscribed or rejected and cannot be reused
    #[error("subscription closed: subscription is {state:?}")]
    SubscriptionClosed {
        /// Terminal state of the subscription
        state: SubscriptionState,
    },

    /// Handle does not belong to this client
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    /// Parameters do not have the required shape
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Endpoint is not a ws:// or wss:// URI
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        Self::InvalidParameters(err.to_string())
    }
}

/// Transport-level failure. Never fatal: it triggers the reconnect policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established
    #[error("connection refused: {0}")]
    Refused(String),

    /// Handshake did not complete within timeout
    #[error("handshake timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// No traffic (not even server pings) within the stale threshold
    #[error("connection stale: no traffic for {elapsed:?}")]
    Stale {
        /// How long the connection was silent
        elapsed: Duration,
    },

    /// Peer or network closed the connection
    #[error("connection closed: {0}")]
    Closed(String),

    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(String),
}

impl TransportError {
    /// Returns true for failures detected by our own timers rather than
    /// reported by the network.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Stale { .. })
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused(err.to_string()),
            io::ErrorKind::TimedOut => Self::Timeout { elapsed: Duration::ZERO },
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Why a transport was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Caller asked to disconnect
    None,
    /// Network failure, timeout or stale connection
    Network(TransportError),
    /// Server sent a `disconnect` message
    ServerClose {
        /// Reason given by the server
        reason: Option<String>,
        /// Whether the server allows reconnecting
        reconnect: bool,
    },
    /// Peer violated the protocol
    Protocol(String),
}

impl DisconnectReason {
    /// Whether the reconnect policy may run after this disconnect.
    ///
    /// Explicit disconnects and server closes with `reconnect: false` never
    /// reconnect.
    pub fn allows_reconnect(&self) -> bool {
        match self {
            Self::None => false,
            Self::ServerClose { reconnect, .. } => *reconnect,
            Self::Network(_) | Self::Protocol(_) => true,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("disconnected by client"),
            Self::Network(err) => write!(f, "network failure: {err}"),
            Self::ServerClose { reason: Some(reason), .. } => write!(f, "server closed: {reason}"),
            Self::ServerClose { reason: None, .. } => f.write_str("server closed"),
            Self::Protocol(detail) => write!(f, "protocol error: {detail}"),
        }
    }
}

/// Inbound body did not match the subscriber's declared payload shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("decode error: {message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Create a decode error with a description of the mismatch.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Description of the mismatch.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Server refused a subscription. Terminal for that subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("subscription rejected: {identifier}")]
pub struct SubscriptionRejected {
    /// Identifier of the rejected subscription
    pub identifier: ChannelIdentifier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_and_final_disconnects_do_not_reconnect() {
        assert!(!DisconnectReason::None.allows_reconnect());
        assert!(
            !DisconnectReason::ServerClose { reason: Some("unauthorized".into()), reconnect: false }
                .allows_reconnect()
        );
    }

    #[test]
    fn failures_allow_reconnect() {
        assert!(DisconnectReason::Network(TransportError::Closed("eof".into())).allows_reconnect());
        assert!(DisconnectReason::ServerClose { reason: None, reconnect: true }.allows_reconnect());
        assert!(DisconnectReason::Protocol("bad frame".into()).allows_reconnect());
    }

    #[test]
    fn io_errors_are_classified() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");

        assert!(matches!(TransportError::from(refused), TransportError::Refused(_)));
        assert!(matches!(TransportError::from(reset), TransportError::Io(_)));
        assert!(TransportError::Stale { elapsed: Duration::from_secs(7) }.is_timeout());
        assert!(!TransportError::Closed("eof".into()).is_timeout());
    }
}
