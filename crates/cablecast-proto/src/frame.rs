//! Transport frames.
//!
//! A [`Frame`] is one WebSocket text message. It is a thin holder around the
//! JSON text: the router decides how to interpret it, so frames can be passed
//! through channels and logged without being parsed.

use crate::{
    Command, ServerMessage,
    errors::{ProtocolError, Result},
};

/// Largest frame accepted by the decoders (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// One text frame exchanged over the transport.
///
/// # Invariants
///
/// - Decoders reject frames larger than [`MAX_FRAME_SIZE`] before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    text: String,
}

impl Frame {
    /// Wrap raw text received from or destined for the transport.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Encode an outbound command.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedJson` if serialization fails
    pub fn from_command(command: &Command) -> Result<Self> {
        Ok(Self { text: serde_json::to_string(command)? })
    }

    /// Encode a server message.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedJson` if serialization fails
    pub fn from_message(message: &ServerMessage) -> Result<Self> {
        Ok(Self { text: message.to_json()? })
    }

    /// Decode as a server message (client side).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the frame exceeds the size limit
    /// - Any error from [`ServerMessage::from_json`]
    pub fn to_message(&self) -> Result<ServerMessage> {
        self.check_size()?;
        ServerMessage::from_json(&self.text)
    }

    /// Decode as a client command (server side).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the frame exceeds the size limit
    /// - `ProtocolError::MalformedJson` if the text is not a command
    pub fn to_command(&self) -> Result<Command> {
        self.check_size()?;
        Ok(serde_json::from_str(&self.text)?)
    }

    /// Frame text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume the frame, returning its text.
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn check_size(&self) -> Result<()> {
        if self.text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: self.text.len(), max: MAX_FRAME_SIZE });
        }
        Ok(())
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_frame_is_rejected_before_parsing() {
        let frame = Frame::new("x".repeat(MAX_FRAME_SIZE + 1));

        assert!(matches!(frame.to_message(), Err(ProtocolError::FrameTooLarge { .. })));
        assert!(matches!(frame.to_command(), Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn command_frame_decodes_as_command() {
        let command = Command::Unsubscribe { identifier: r#"{"channel":"room"}"#.into() };
        let frame = Frame::from_command(&command).unwrap();

        assert_eq!(frame.to_command().unwrap(), command);
        assert!(frame.to_message().is_err());
    }
}
