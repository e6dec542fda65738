//! Outbound commands.
//!
//! Every client-to-server frame is one of three commands, each addressed to a
//! channel by its identifier string:
//!
//! ```json
//! {"command":"subscribe","identifier":"{\"channel\":\"ChatChannel\"}"}
//! {"command":"unsubscribe","identifier":"{\"channel\":\"ChatChannel\"}"}
//! {"command":"message","identifier":"…","data":"{\"action\":\"talk\",…}"}
//! ```
//!
//! `data` is itself a JSON object string: the action parameters plus the
//! action name under the `action` key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ChannelIdentifier, Params,
    errors::{ProtocolError, Result},
};

/// Key under which the action name is stored inside `data`.
const ACTION_KEY: &str = "action";

/// Client-to-server command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Ask the server to attach this connection to a channel.
    Subscribe {
        /// Channel identifier string
        identifier: String,
    },

    /// Detach this connection from a channel.
    Unsubscribe {
        /// Channel identifier string
        identifier: String,
    },

    /// Invoke a named action on a subscribed channel.
    Message {
        /// Channel identifier string
        identifier: String,
        /// JSON object string holding `action` plus parameters
        data: String,
    },
}

impl Command {
    /// `subscribe` command for a channel.
    #[must_use]
    pub fn subscribe(identifier: &ChannelIdentifier) -> Self {
        Self::Subscribe { identifier: identifier.as_wire().to_string() }
    }

    /// `unsubscribe` command for a channel.
    #[must_use]
    pub fn unsubscribe(identifier: &ChannelIdentifier) -> Self {
        Self::Unsubscribe { identifier: identifier.as_wire().to_string() }
    }

    /// `message` command invoking `action` with `params`.
    ///
    /// An `action` key inside `params` is overridden by the action name.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedJson` if the data cannot be serialized
    pub fn perform(identifier: &ChannelIdentifier, action: &str, params: &Params) -> Result<Self> {
        let mut data = params.clone();
        data.insert(ACTION_KEY.to_string(), Value::String(action.to_string()));

        Ok(Self::Message {
            identifier: identifier.as_wire().to_string(),
            data: serde_json::to_string(&data)?,
        })
    }

    /// Identifier string the command is addressed to.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Subscribe { identifier }
            | Self::Unsubscribe { identifier }
            | Self::Message { identifier, .. } => identifier,
        }
    }

    /// Split a `message` command's data into action name and parameters.
    ///
    /// Returns `None` for `subscribe`/`unsubscribe`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedJson` if `data` is not a JSON object
    /// - `ProtocolError::MissingField` if `data` has no string `action`
    pub fn action(&self) -> Option<Result<(String, Params)>> {
        match self {
            Self::Message { data, .. } => Some(split_action(data)),
            Self::Subscribe { .. } | Self::Unsubscribe { .. } => None,
        }
    }
}

fn split_action(data: &str) -> Result<(String, Params)> {
    let mut params: Params = serde_json::from_str(data)?;
    match params.remove(ACTION_KEY) {
        Some(Value::String(action)) => Ok((action, params)),
        _ => Err(ProtocolError::MissingField(ACTION_KEY)),
    }
}
