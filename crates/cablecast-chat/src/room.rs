//! Chat room state machine driven by session events.

use std::time::Duration;

use cablecast_client::{
    ClientError, DisconnectReason, MaxAttempts, Session, SessionEvent, Subscription,
    SubscriptionState,
};
use cablecast_core::Environment;
use cablecast_proto::Params;
use serde_json::Value;

use crate::message::{ChatHistory, ChatMessage};

/// Channel every room lives on.
pub const CHANNEL: &str = "ChatChannel";

/// Action that posts a line to the room.
pub const ACTION: &str = "talk";

/// Errors from chat operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The room has not been joined on the current connection
    #[error("not joined to room {room_id}")]
    NotJoined {
        /// Room that was addressed
        room_id: String,
    },

    /// Session rejected the operation
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// What changed in the room, for display.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    /// Opening the transport
    Connecting,
    /// Session established, join requested
    Connected,
    /// Server confirmed the room subscription
    Joined,
    /// Server refused the room subscription
    Refused,
    /// A line arrived and was added to the history
    Message {
        /// The line
        message: ChatMessage,
        /// True if it carries the user's own name
        own: bool,
    },
    /// Transport lost
    Disconnected(DisconnectReason),
    /// Next connection attempt is scheduled
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// No further reconnection will be attempted
    Halted,
}

/// One chat room over a session.
pub struct ChatRoom<E: Environment> {
    session: Session<ChatMessage, E>,
    name: String,
    room_id: String,
    subscription: Option<Subscription>,
    history: ChatHistory,
}

impl<E: Environment> std::fmt::Debug for ChatRoom<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRoom")
            .field("name", &self.name)
            .field("room_id", &self.room_id)
            .field("subscription", &self.subscription)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> ChatRoom<E> {
    /// Room `room_id` as user `name`. Call [`ChatRoom::connect`] to start.
    pub fn new(
        session: Session<ChatMessage, E>,
        name: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            session,
            name: name.into(),
            room_id: room_id.into(),
            subscription: None,
            history: ChatHistory::new(),
        }
    }

    /// Display name used for outgoing lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Room identifier.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Received lines.
    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Underlying session.
    pub fn session(&self) -> &Session<ChatMessage, E> {
        &self.session
    }

    /// True once the server confirmed the room on the current connection.
    pub fn is_joined(&self) -> bool {
        self.subscription
            .as_ref()
            .and_then(|sub| self.session.subscription_state(sub))
            .is_some_and(|state| state == SubscriptionState::Subscribed)
    }

    /// Give up after `max` consecutive failed reconnects.
    pub fn set_max_reconnects(&mut self, max: u32) {
        self.session.set_reconnect_hook(MaxAttempts(max));
    }

    /// Start connecting. The room is joined once the session is connected.
    pub fn connect(&mut self) {
        self.session.connect();
    }

    /// Leave the room and close the session.
    pub fn disconnect(&mut self) {
        if let Some(sub) = self.subscription.take()
            && let Err(error) = self.session.unsubscribe(&sub)
        {
            tracing::debug!(%error, "leaving room without unsubscribe");
        }
        self.session.disconnect();
    }

    /// Post `text` to the room.
    ///
    /// Surrounding whitespace is trimmed. Returns `Ok(false)` without sending
    /// anything if nothing is left, and [`ChatError::NotJoined`] until the
    /// server has confirmed the room on the current connection.
    pub fn send_message(&mut self, text: &str) -> Result<bool, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        let Some(sub) = self.subscription.as_ref().filter(|_| self.is_joined()) else {
            return Err(ChatError::NotJoined { room_id: self.room_id.clone() });
        };

        let params = ChatMessage::new(self.name.clone(), text).to_params();
        self.session.perform(sub, ACTION, &params)?;
        Ok(true)
    }

    /// Wait for the next change worth showing.
    ///
    /// Cancel safe.
    pub async fn next_update(&mut self) -> ChatUpdate {
        loop {
            let event = self.session.next_event().await;
            if let Some(update) = self.apply(event) {
                return update;
            }
        }
    }

    fn apply(&mut self, event: SessionEvent<ChatMessage>) -> Option<ChatUpdate> {
        match event {
            SessionEvent::WillConnect => Some(ChatUpdate::Connecting),
            SessionEvent::Connected => {
                self.join();
                Some(ChatUpdate::Connected)
            },
            SessionEvent::Disconnected { reason } => Some(ChatUpdate::Disconnected(reason)),
            SessionEvent::ReconnectScheduled { attempt, delay } => {
                Some(ChatUpdate::Reconnecting { attempt, delay })
            },
            SessionEvent::ReconnectHalted => Some(ChatUpdate::Halted),
            SessionEvent::Subscribed { .. } => Some(ChatUpdate::Joined),
            SessionEvent::Rejected { error, .. } => {
                tracing::warn!(%error, "room subscription refused");
                self.subscription = None;
                Some(ChatUpdate::Refused)
            },
            SessionEvent::Received { result: Ok(message), .. } => {
                let own = message.name == self.name;
                self.history.push(message.clone());
                Some(ChatUpdate::Message { message, own })
            },
            SessionEvent::Received { identifier, result: Err(error), .. } => {
                tracing::warn!(%identifier, %error, "discarding undecodable chat message");
                None
            },
        }
    }

    fn join(&mut self) {
        let result = if let Some(sub) = &self.subscription {
            self.session.resubscribe(sub)
        } else {
            let params = self.params();
            self.session.subscribe(CHANNEL, params).map(|sub| self.subscription = Some(sub))
        };

        if let Err(error) = result {
            let state = self.session.connection_state();
            tracing::warn!(%error, ?state, room_id = %self.room_id, "failed to join room");
        }
    }

    fn params(&self) -> Params {
        let mut params = Params::new();
        params.insert("room_id".to_string(), Value::String(self.room_id.clone()));
        params
    }
}
