//! Channel identity.
//!
//! ActionCable addresses a subscription by an identifier string: a JSON object
//! holding the channel class name plus the subscription parameters. Servers
//! echo the identifier back verbatim, but other clients and proxies may
//! reorder keys, so every identifier is reduced to a canonical form (sorted
//! keys, compact JSON) before it is compared.

use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

use serde_json::{Map, Value};

use crate::errors::{ProtocolError, Result};

/// String-keyed parameter mapping for subscriptions and actions.
pub type Params = Map<String, Value>;

/// Key under which the channel name is stored inside the identifier.
const CHANNEL_KEY: &str = "channel";

/// Canonical identity of one channel subscription.
///
/// # Invariants
///
/// - Every parameter value is a scalar (string, number, bool or null).
/// - `wire` is the canonical encoding of `channel` + `params`, so two
///   identifiers are equal iff their wire strings are equal.
#[derive(Debug, Clone)]
pub struct ChannelIdentifier {
    channel: String,
    params: Params,
    wire: String,
}

impl ChannelIdentifier {
    /// Build an identifier from a channel name and scalar parameters.
    ///
    /// A `channel` key inside `params` is ignored; the channel name wins.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::NonScalarParameter` if a parameter is an array or
    ///   object
    pub fn new(channel: impl Into<String>, params: Params) -> Result<Self> {
        let channel = channel.into();
        let mut params = params;
        params.remove(CHANNEL_KEY);

        if let Some((key, _)) = params.iter().find(|(_, value)| !is_scalar(value)) {
            return Err(ProtocolError::NonScalarParameter { key: key.clone() });
        }

        let wire = canonical_wire(&channel, &params)?;
        Ok(Self { channel, params, wire })
    }

    /// Parse an identifier string received from the wire.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidIdentifier` if the string is not a JSON object
    ///   with a string `channel`
    /// - `ProtocolError::NonScalarParameter` if a parameter is not a scalar
    pub fn parse(wire: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(wire)
            .map_err(|e| ProtocolError::InvalidIdentifier(e.to_string()))?;

        let Value::Object(mut object) = value else {
            return Err(ProtocolError::InvalidIdentifier("expected a JSON object".to_string()));
        };

        let channel = match object.remove(CHANNEL_KEY) {
            Some(Value::String(channel)) => channel,
            Some(_) => {
                return Err(ProtocolError::InvalidIdentifier(
                    "`channel` must be a string".to_string(),
                ));
            },
            None => {
                return Err(ProtocolError::InvalidIdentifier("missing `channel`".to_string()));
            },
        };

        Self::new(channel, object)
    }

    /// Channel class name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscription parameters, without the channel name.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Canonical identifier string as sent on the wire.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        &self.wire
    }
}

impl PartialEq for ChannelIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.wire == other.wire
    }
}

impl Eq for ChannelIdentifier {}

impl Hash for ChannelIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.wire.hash(state);
    }
}

impl fmt::Display for ChannelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire)
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Sorted-key encoding, independent of serde_json's map ordering feature.
fn canonical_wire(channel: &str, params: &Params) -> Result<String> {
    let channel = Value::String(channel.to_string());
    let mut sorted: BTreeMap<&str, &Value> = params.iter().map(|(k, v)| (k.as_str(), v)).collect();
    sorted.insert(CHANNEL_KEY, &channel);
    Ok(serde_json::to_string(&sorted)?)
}
