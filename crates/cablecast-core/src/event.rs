//! Inputs to and outputs from the [`Client`](crate::Client).
//!
//! The runtime feeds [`ClientEvent`]s in and drains [`ClientAction`]s out.
//! [`SessionEvent`]s are the observer-facing notifications, delivered in
//! order on the single designated execution context.

use std::{collections::BTreeMap, time::Duration};

use cablecast_proto::{ChannelIdentifier, Frame};

use crate::{
    connection::{AttemptId, TimerId},
    error::{DecodeError, DisconnectReason, SubscriptionRejected, TransportError},
    subscription::SubscriptionId,
};

/// Transport-side input for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Transport for `attempt` is open
    TransportOpened {
        /// Attempt the transport belongs to
        attempt: AttemptId,
    },

    /// Transport for `attempt` could not be opened or was lost
    TransportFailed {
        /// Attempt the transport belongs to
        attempt: AttemptId,
        /// What went wrong
        error: TransportError,
    },

    /// One inbound text frame
    FrameReceived {
        /// Attempt the frame arrived on
        attempt: AttemptId,
        /// Raw frame
        frame: Frame,
    },

    /// A scheduled reconnect timer elapsed
    ReconnectTimerFired {
        /// Timer that fired
        timer: TimerId,
    },

    /// Periodic maintenance (handshake timeout, stale detection, sweeping
    /// released subscriptions)
    Tick,
}

/// Everything a transport needs to open one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Attempt being opened
    pub attempt: AttemptId,
    /// `ws://` or `wss://` endpoint
    pub endpoint: String,
    /// Headers sent with the upgrade request
    pub headers: BTreeMap<String, String>,
}

/// Work for the runtime to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction<P> {
    /// Open a transport and report back with `TransportOpened` or
    /// `TransportFailed`
    OpenTransport(ConnectRequest),

    /// Release the transport of `attempt`
    CloseTransport {
        /// Attempt to close
        attempt: AttemptId,
    },

    /// Write one frame on the transport of `attempt`
    Send {
        /// Attempt whose transport carries the frame
        attempt: AttemptId,
        /// Outbound frame
        frame: Frame,
    },

    /// Start a cancellable timer; report `ReconnectTimerFired` when it elapses
    ScheduleReconnect {
        /// Timer identity
        timer: TimerId,
        /// Delay
        delay: Duration,
    },

    /// Drop the timer synchronously
    CancelReconnect {
        /// Timer identity
        timer: TimerId,
    },

    /// Deliver a notification to the observer
    Notify(SessionEvent<P>),
}

/// Observer-facing notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent<P> {
    /// A transport attempt is starting
    WillConnect,

    /// Transport established and handshake complete
    Connected,

    /// Transport lost
    Disconnected {
        /// Classification of the loss
        reason: DisconnectReason,
    },

    /// Next reconnect attempt scheduled
    ReconnectScheduled {
        /// 1-based attempt number in this episode
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },

    /// Reconnection stopped until the next explicit connect
    ReconnectHalted,

    /// Server confirmed a subscription
    Subscribed {
        /// Confirmed subscription
        subscription: SubscriptionId,
        /// Channel identity
        identifier: ChannelIdentifier,
    },

    /// Server rejected a subscription
    Rejected {
        /// Rejected subscription
        subscription: SubscriptionId,
        /// Rejection details
        error: SubscriptionRejected,
    },

    /// Broadcast for a subscription
    Received {
        /// Target subscription
        subscription: SubscriptionId,
        /// Channel identity
        identifier: ChannelIdentifier,
        /// Decoded payload or decode error
        result: Result<P, DecodeError>,
    },
}
