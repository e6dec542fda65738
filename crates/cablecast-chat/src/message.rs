//! Chat payloads and history.

use std::fmt;

use cablecast_proto::Params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One chat line as broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the author
    pub name: String,
    /// Message text
    pub message: String,
}

impl ChatMessage {
    /// Create a message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }

    /// Parameters of the `talk` action.
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("name".to_string(), Value::String(self.name.clone()));
        params.insert("message".to_string(), Value::String(self.message.clone()));
        params
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Received messages in arrival order. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Messages, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Most recent message.
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if nothing was received yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn display_is_name_colon_message() {
        assert_eq!(ChatMessage::new("Alice", "hi there").to_string(), "Alice: hi there");
    }

    #[test]
    fn decodes_broadcast_body() {
        let body = json!({ "name": "Bob", "message": "yo", "sent_at": 1 });
        let message: ChatMessage = serde_json::from_value(body).unwrap();
        assert_eq!(message, ChatMessage::new("Bob", "yo"));
    }

    #[test]
    fn missing_field_is_rejected() {
        assert!(serde_json::from_value::<ChatMessage>(json!({ "name": "Bob" })).is_err());
    }

    #[test]
    fn params_carry_both_fields() {
        let params = ChatMessage::new("Alice", "hi").to_params();
        assert_eq!(Value::Object(params), json!({ "name": "Alice", "message": "hi" }));
    }

    #[test]
    fn history_keeps_arrival_order() {
        let mut history = ChatHistory::new();
        assert!(history.is_empty());

        history.push(ChatMessage::new("a", "1"));
        history.push(ChatMessage::new("b", "2"));

        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].message, "1");
        assert_eq!(history.last(), Some(&ChatMessage::new("b", "2")));
    }
}
