//! Live channel events
//!
//! Every frame on the live channel is a JSON object tagged by `"event"`:
//!
//! ```text
//! {"event":"joinRoom","conversationId":"c1"}
//! {"event":"typingStatus","conversationId":"c1","userId":"u2","isTyping":true}
//! ```
//!
//! Inbound events are validated with [`ClientEvent::validate`] before dispatch.

use crate::models::{ConversationId, MessageId, MessageView, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client → server events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Announce the authenticated identity of this connection
    Identify { user_id: UserId },
    JoinRoom { conversation_id: ConversationId },
    LeaveRoom { conversation_id: ConversationId },
    /// Notify viewers about a message that was already durably sent
    SendLive { message: LiveMessageRef },
    Typing {
        conversation_id: ConversationId,
        #[serde(default)]
        user_id: UserId,
        is_typing: bool,
    },
}

/// The part of a persisted message the live channel needs.
///
/// Deserializes from a full [`MessageView`]; unknown fields are ignored and
/// missing ones default to empty so validation can reject them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMessageRef {
    #[serde(default)]
    pub id: MessageId,
    #[serde(default)]
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub content: String,
}

impl From<&MessageView> for LiveMessageRef {
    fn from(message: &MessageView) -> Self {
        Self {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
        }
    }
}

/// Server → client events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Sorted identities with at least one live connection
    Presence { online_users: Vec<UserId> },
    MessageDelivered { message: MessageView },
    TypingStatus {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Presence { .. } => "presence",
            ServerEvent::MessageDelivered { .. } => "messageDelivered",
            ServerEvent::TypingStatus { .. } => "typingStatus",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

fn require(value: &str, field: &'static str) -> Result<(), EventError> {
    if value.trim().is_empty() {
        return Err(EventError::MissingField(field));
    }
    Ok(())
}

impl ClientEvent {
    /// Parse and validate one text frame.
    pub fn parse(text: &str) -> Result<Self, EventError> {
        let event: ClientEvent =
            serde_json::from_str(text).map_err(|e| EventError::Malformed(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Check the per-kind field schema.
    pub fn validate(&self) -> Result<(), EventError> {
        match self {
            ClientEvent::Identify { user_id } => require(user_id, "userId"),
            ClientEvent::JoinRoom { conversation_id } | ClientEvent::LeaveRoom { conversation_id } => {
                require(conversation_id, "conversationId")
            }
            ClientEvent::SendLive { message } => {
                require(&message.id, "message.id")?;
                require(&message.conversation_id, "message.conversationId")?;
                require(&message.content, "message.content")
            }
            ClientEvent::Typing { conversation_id, .. } => require(conversation_id, "conversationId"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Identify { .. } => "identify",
            ClientEvent::JoinRoom { .. } => "joinRoom",
            ClientEvent::LeaveRoom { .. } => "leaveRoom",
            ClientEvent::SendLive { .. } => "sendLive",
            ClientEvent::Typing { .. } => "typing",
        }
    }
}
