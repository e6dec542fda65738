//! Protocol error types.

use thiserror::Error;

/// Result alias for wire format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds [`crate::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the offending frame
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Text is not valid JSON or does not have the expected shape.
    #[error("malformed json: {0}")]
    MalformedJson(String),

    /// Server message carries a `type` this client does not understand.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// Channel identifier is not a JSON object with a string `channel`.
    #[error("invalid channel identifier: {0}")]
    InvalidIdentifier(String),

    /// Subscription parameter is not a scalar value.
    #[error("parameter `{key}` must be a string, number, bool or null")]
    NonScalarParameter {
        /// Offending parameter name
        key: String,
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedJson(err.to_string())
    }
}
