use super::store::{ConversationEntry, MessageRecord};
use crate::core::auth::AuthManager;
use crate::core::error::Result;
use parley_common::{ConversationView, MessageView, UserInfo};
use std::collections::HashMap;

/// Resolves user ids in stored records to `UserInfo`s
pub struct Populator {
    users: HashMap<String, UserInfo>,
}

impl Populator {
    pub async fn for_entries(auth: &AuthManager, entries: &[ConversationEntry]) -> Result<Self> {
        let mut ids: Vec<String> = Vec::new();
        for entry in entries {
            ids.extend(entry.record.members.iter().cloned());
            ids.extend(entry.record.admin.iter().cloned());
            ids.extend(entry.latest.iter().map(|m| m.sender.clone()));
        }
        Self::for_ids(auth, ids).await
    }

    pub async fn for_messages(auth: &AuthManager, messages: &[MessageRecord]) -> Result<Self> {
        Self::for_ids(auth, messages.iter().map(|m| m.sender.clone()).collect()).await
    }

    async fn for_ids(auth: &AuthManager, mut ids: Vec<String>) -> Result<Self> {
        ids.sort();
        ids.dedup();
        Ok(Self {
            users: auth.users_by_ids(&ids).await?,
        })
    }

    fn user(&self, id: &str) -> UserInfo {
        self.users
            .get(id)
            .cloned()
            .unwrap_or_else(|| UserInfo::unknown(id))
    }

    pub fn message(&self, record: &MessageRecord) -> MessageView {
        MessageView {
            id: record.id.clone(),
            sender: self.user(&record.sender),
            conversation_id: record.conversation_id.clone(),
            content: record.content.clone(),
            created_at: record.created_at,
        }
    }

    pub fn conversation(&self, entry: &ConversationEntry) -> ConversationView {
        let record = &entry.record;
        ConversationView {
            id: record.id.clone(),
            name: record.name.clone(),
            is_group: record.is_group,
            members: record.members.iter().map(|id| self.user(id)).collect(),
            admin: record.admin.as_deref().map(|id| self.user(id)),
            latest_message: entry.latest.as_ref().map(|m| self.message(m)),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

pub async fn conversation_view(auth: &AuthManager, entry: ConversationEntry) -> Result<ConversationView> {
    let populator = Populator::for_entries(auth, std::slice::from_ref(&entry)).await?;
    Ok(populator.conversation(&entry))
}

pub async fn message_view(auth: &AuthManager, record: &MessageRecord) -> Result<MessageView> {
    let populator = Populator::for_messages(auth, std::slice::from_ref(record)).await?;
    Ok(populator.message(record))
}
