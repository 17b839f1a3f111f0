use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type ConversationId = String;
pub type MessageId = String;

/// Public user info (no credentials)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl UserInfo {
    /// Placeholder for an identity the account store no longer knows about.
    pub fn unknown(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            email: String::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A persisted message with its sender populated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender: UserInfo,
    pub conversation_id: ConversationId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation with members, admin and latest message populated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: ConversationId,
    /// Display name, only meaningful for groups
    pub name: String,
    pub is_group: bool,
    pub members: Vec<UserInfo>,
    pub admin: Option<UserInfo>,
    pub latest_message: Option<MessageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationView {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.id == user_id)
    }
}
