//! Message Router.
//!
//! Demultiplexes inbound channel messages by canonical channel identity and
//! decodes broadcast bodies with the subscriber's declared decoder. Serializes
//! outbound actions into frames.
//!
//! Messages for unknown, closed or released subscriptions are dropped without
//! producing any event.

use cablecast_proto::{ChannelIdentifier, Command, Frame, Params, ServerMessage};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    connection::AttemptId,
    error::{ClientError, DecodeError},
    subscription::{Lookup, Released, SubscriptionId, SubscriptionRegistry, SubscriptionState},
};

/// Converts a broadcast body into the subscriber's payload type.
pub type Decoder<P> = fn(&Value) -> Result<P, DecodeError>;

/// Default decoder: serde deserialization of the body.
///
/// Missing or mistyped fields become a [`DecodeError`].
pub fn decode_json<P: DeserializeOwned>(body: &Value) -> Result<P, DecodeError> {
    Ok(P::deserialize(body)?)
}

/// Outcome of dispatching one server message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<P> {
    /// Broadcast for a subscribed channel
    Received {
        /// Target subscription
        subscription: SubscriptionId,
        /// Channel identity
        identifier: ChannelIdentifier,
        /// Decoded payload or the reason it did not decode
        result: Result<P, DecodeError>,
    },

    /// Server confirmed a pending subscription
    Confirmed {
        /// Confirmed subscription
        subscription: SubscriptionId,
        /// Channel identity
        identifier: ChannelIdentifier,
    },

    /// Server rejected a pending subscription
    Rejected {
        /// Rejected subscription
        subscription: SubscriptionId,
        /// Channel identity
        identifier: ChannelIdentifier,
    },

    /// Message hit a subscription whose handles were all dropped
    Released(Released),

    /// Nothing to deliver
    Dropped,
}

/// Routes inbound channel messages to subscriptions.
#[derive(Debug)]
pub struct Router<P> {
    subscriptions: SubscriptionRegistry<P>,
}

impl<P> Default for Router<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Router<P> {
    /// Create a router with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self { subscriptions: SubscriptionRegistry::new() }
    }

    /// Subscription registry.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry<P> {
        &self.subscriptions
    }

    /// Mutable subscription registry.
    pub fn subscriptions_mut(&mut self) -> &mut SubscriptionRegistry<P> {
        &mut self.subscriptions
    }

    /// Route one server message received on `attempt`.
    ///
    /// Confirmations and rejections only apply to requests sent on the same
    /// attempt. Never panics. Connection-level messages (welcome, ping, disconnect)
    /// and messages with an unparsable identifier yield [`Dispatch::Dropped`].
    pub fn dispatch(&mut self, attempt: AttemptId, message: &ServerMessage) -> Dispatch<P> {
        let Some(wire) = message.identifier() else {
            return Dispatch::Dropped;
        };

        let identifier = match ChannelIdentifier::parse(wire) {
            Ok(identifier) => identifier,
            Err(error) => {
                tracing::warn!(%error, identifier = wire, "dropping message with invalid identifier");
                return Dispatch::Dropped;
            },
        };

        let id = match self.subscriptions.lookup(&identifier) {
            Lookup::Live(id) => id,
            Lookup::Released(released) => {
                tracing::debug!(subscription = %released.id, %identifier, "pruned released subscription");
                return Dispatch::Released(released);
            },
            Lookup::Missing => {
                tracing::debug!(%identifier, "dropping message for unknown subscription");
                return Dispatch::Dropped;
            },
        };

        match message {
            ServerMessage::Broadcast { message: body, .. } => {
                if self.subscriptions.state(id) != Some(SubscriptionState::Subscribed) {
                    tracing::debug!(subscription = %id, "dropping broadcast for unconfirmed subscription");
                    return Dispatch::Dropped;
                }
                let Some(decoder) = self.subscriptions.decoder(id) else {
                    return Dispatch::Dropped;
                };
                Dispatch::Received { subscription: id, identifier, result: decoder(body) }
            },
            ServerMessage::ConfirmSubscription { .. } => {
                if self.subscriptions.confirm(id, attempt) {
                    Dispatch::Confirmed { subscription: id, identifier }
                } else {
                    Dispatch::Dropped
                }
            },
            ServerMessage::RejectSubscription { .. } => {
                if self.subscriptions.reject(id, attempt) {
                    Dispatch::Rejected { subscription: id, identifier }
                } else {
                    Dispatch::Dropped
                }
            },
            ServerMessage::Welcome | ServerMessage::Ping { .. } | ServerMessage::Disconnect { .. } => {
                Dispatch::Dropped
            },
        }
    }

    /// Serialize an action call into an outbound frame.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidParameters` if the frame cannot be built
    pub fn encode(
        identifier: &ChannelIdentifier,
        action: &str,
        params: &Params,
    ) -> Result<Frame, ClientError> {
        let command = Command::perform(identifier, action, params)?;
        Ok(Frame::from_command(&command)?)
    }
}
