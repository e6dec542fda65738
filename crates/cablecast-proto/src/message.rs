//! Inbound server messages.
//!
//! Protocol messages carry a `type`; channel broadcasts carry only an
//! `identifier` and a `message` body:
//!
//! ```json
//! {"type":"welcome"}
//! {"type":"ping","message":1700000000}
//! {"type":"disconnect","reason":"unauthorized","reconnect":false}
//! {"type":"confirm_subscription","identifier":"…"}
//! {"type":"reject_subscription","identifier":"…"}
//! {"identifier":"…","message":{"name":"Alice","message":"hi"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Server-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Connection accepted; the session is usable from now on.
    Welcome,

    /// Keepalive sent by the server every few seconds.
    Ping {
        /// Server clock in unix seconds, if present
        timestamp: Option<i64>,
    },

    /// Server is closing the connection.
    Disconnect {
        /// Reason given by the server (e.g. `unauthorized`)
        reason: Option<String>,
        /// Whether the client may reconnect
        reconnect: bool,
    },

    /// Subscription accepted.
    ConfirmSubscription {
        /// Identifier string of the confirmed subscription
        identifier: String,
    },

    /// Subscription refused.
    RejectSubscription {
        /// Identifier string of the rejected subscription
        identifier: String,
    },

    /// Channel payload.
    Broadcast {
        /// Identifier string of the target subscription
        identifier: String,
        /// Opaque body, decoded by the subscriber
        message: Value,
    },
}

/// Flat wire representation shared by every message kind.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawServerMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reconnect: Option<bool>,
}

impl ServerMessage {
    /// Parse a message from JSON text.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedJson` if the text is not a JSON object
    /// - `ProtocolError::UnknownMessageType` for an unsupported `type`
    /// - `ProtocolError::MissingField` if a required field is absent
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawServerMessage = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Serialize to JSON text (used by servers and test harnesses).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedJson` if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_raw())?)
    }

    /// Identifier string for channel-scoped messages.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::ConfirmSubscription { identifier }
            | Self::RejectSubscription { identifier }
            | Self::Broadcast { identifier, .. } => Some(identifier),
            Self::Welcome | Self::Ping { .. } | Self::Disconnect { .. } => None,
        }
    }

    fn from_raw(raw: RawServerMessage) -> Result<Self> {
        let Some(kind) = raw.kind else {
            let identifier = raw.identifier.ok_or(ProtocolError::MissingField("type"))?;
            let message = raw.message.ok_or(ProtocolError::MissingField("message"))?;
            return Ok(Self::Broadcast { identifier, message });
        };

        match kind.as_str() {
            "welcome" => Ok(Self::Welcome),
            "ping" => Ok(Self::Ping { timestamp: raw.message.as_ref().and_then(Value::as_i64) }),
            "disconnect" => {
                Ok(Self::Disconnect { reason: raw.reason, reconnect: raw.reconnect.unwrap_or(true) })
            },
            "confirm_subscription" => Ok(Self::ConfirmSubscription {
                identifier: raw.identifier.ok_or(ProtocolError::MissingField("identifier"))?,
            }),
            "reject_subscription" => Ok(Self::RejectSubscription {
                identifier: raw.identifier.ok_or(ProtocolError::MissingField("identifier"))?,
            }),
            _ => Err(ProtocolError::UnknownMessageType(kind)),
        }
    }

    fn to_raw(&self) -> RawServerMessage {
        let typed = |kind: &str| RawServerMessage { kind: Some(kind.to_string()), ..Default::default() };

        match self {
            Self::Welcome => typed("welcome"),
            Self::Ping { timestamp } => {
                RawServerMessage { message: timestamp.map(Value::from), ..typed("ping") }
            },
            Self::Disconnect { reason, reconnect } => RawServerMessage {
                reason: reason.clone(),
                reconnect: Some(*reconnect),
                ..typed("disconnect")
            },
            Self::ConfirmSubscription { identifier } => RawServerMessage {
                identifier: Some(identifier.clone()),
                ..typed("confirm_subscription")
            },
            Self::RejectSubscription { identifier } => RawServerMessage {
                identifier: Some(identifier.clone()),
                ..typed("reject_subscription")
            },
            Self::Broadcast { identifier, message } => RawServerMessage {
                identifier: Some(identifier.clone()),
                message: Some(message.clone()),
                ..Default::default()
            },
        }
    }
}
