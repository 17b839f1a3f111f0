//! Conversation and message document store
//!
//! All records live in memory under one `RwLock`. On disk the conversation
//! records form one JSON index and each conversation's messages have their
//! own file under `messages/`, so a send rewrites the index and a single
//! message file. Every file goes through a temp file plus rename.
//!
//! A mutation is applied to a copy of the state, the files it changed are
//! written out, and only then does the copy replace the live state. Message
//! lists sit behind `Arc`, so the copy shares every conversation the
//! mutation leaves alone. A failed write leaves memory unchanged and the
//! caller sees `Persistence`.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use parley_common::{ConversationId, MessageId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("failed to persist directory: {0}")]
    Persistence(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: ConversationId,
    /// Display name, meaningful only for groups
    pub name: String,
    pub is_group: bool,
    /// Insertion-ordered, unique
    pub members: Vec<UserId>,
    pub admin: Option<UserId>,
    pub latest_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    fn is_admin(&self, user_id: &str) -> bool {
        self.admin.as_deref() == Some(user_id)
    }

    fn is_direct_between(&self, a: &str, b: &str) -> bool {
        !self.is_group && self.members.len() == 2 && self.has_member(a) && self.has_member(b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: UserId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation together with its latest message, if any
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub record: ConversationRecord,
    pub latest: Option<MessageRecord>,
}

#[derive(Debug, Clone, Default)]
struct DirectoryState {
    conversations: HashMap<ConversationId, ConversationRecord>,
    /// Per-conversation messages in creation order
    messages: HashMap<ConversationId, Arc<Vec<MessageRecord>>>,
}

/// On-disk shape of the index file
#[derive(Serialize, Deserialize)]
struct IndexFile<C> {
    conversations: C,
}

impl DirectoryState {
    fn message_count(&self) -> usize {
        self.messages.values().map(|m| m.len()).sum()
    }

    /// Not-found is reported before membership.
    fn authorize(&self, actor: &str, id: &str) -> DirectoryResult<&ConversationRecord> {
        let record = self
            .conversations
            .get(id)
            .ok_or_else(|| DirectoryError::NotFound(format!("Chat {} not found", id)))?;
        if !record.has_member(actor) {
            return Err(DirectoryError::Forbidden(
                "You are not a member of this chat".to_string(),
            ));
        }
        Ok(record)
    }

    fn authorize_mut(&mut self, actor: &str, id: &str) -> DirectoryResult<&mut ConversationRecord> {
        self.authorize(actor, id)?;
        self.conversations
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound(format!("Chat {} not found", id)))
    }

    fn authorize_admin(&self, actor: &str, id: &str) -> DirectoryResult<&ConversationRecord> {
        let record = self.authorize(actor, id)?;
        if !record.is_group {
            return Err(DirectoryError::Validation(
                "Only group chats support this operation".to_string(),
            ));
        }
        if !record.is_admin(actor) {
            return Err(DirectoryError::Forbidden(
                "Only the group admin can do this".to_string(),
            ));
        }
        Ok(record)
    }

    fn authorize_admin_mut(
        &mut self,
        actor: &str,
        id: &str,
    ) -> DirectoryResult<&mut ConversationRecord> {
        self.authorize_admin(actor, id)?;
        self.conversations
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound(format!("Chat {} not found", id)))
    }

    fn entry(&self, record: &ConversationRecord) -> ConversationEntry {
        let latest = record.latest_message_id.as_ref().and_then(|mid| {
            self.messages
                .get(&record.id)
                .and_then(|msgs| msgs.iter().rev().find(|m| &m.id == mid))
                .cloned()
        });
        ConversationEntry {
            record: record.clone(),
            latest,
        }
    }
}

fn persistence(err: impl std::fmt::Display) -> DirectoryError {
    DirectoryError::Persistence(err.to_string())
}

/// Message files live next to the index
fn messages_dir(index: &Path) -> PathBuf {
    index.with_file_name("messages")
}

fn message_file(dir: &Path, conversation_id: &str) -> PathBuf {
    dir.join(format!("{}.json", conversation_id))
}

async fn write_atomic(path: &Path, bytes: Vec<u8>) -> DirectoryResult<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, bytes).await.map_err(persistence)?;
    fs::rename(&temp_path, path).await.map_err(persistence)?;
    Ok(())
}

fn required(value: &str, what: &str) -> DirectoryResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DirectoryError::Validation(format!("{} is required", what)));
    }
    Ok(trimmed.to_string())
}

pub struct DirectoryStore {
    /// Snapshot location; `None` keeps everything in memory
    path: Option<PathBuf>,
    state: RwLock<DirectoryState>,
}

impl DirectoryStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(DirectoryState::default()),
        }
    }

    /// Load the index at `path` and its message files, or start empty
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let dir = messages_dir(&path);
        fs::create_dir_all(&dir).await?;

        let conversations: HashMap<ConversationId, ConversationRecord> =
            if fs::try_exists(&path).await? {
                let content = fs::read_to_string(&path).await?;
                serde_json::from_str::<IndexFile<_>>(&content)
                    .with_context(|| format!("Failed to parse directory index {:?}", path))?
                    .conversations
            } else {
                HashMap::new()
            };

        // Files of conversations missing from the index are left alone.
        let mut messages = HashMap::new();
        for id in conversations.keys() {
            let file = message_file(&dir, id);
            if !fs::try_exists(&file).await? {
                continue;
            }
            let content = fs::read_to_string(&file).await?;
            let list: Vec<MessageRecord> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse messages {:?}", file))?;
            messages.insert(id.clone(), Arc::new(list));
        }

        let state = DirectoryState {
            conversations,
            messages,
        };
        info!(
            "Directory loaded: {} chats, {} messages",
            state.conversations.len(),
            state.message_count()
        );

        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// Write what differs between `prev` and `next`: touched message files,
    /// then the index, then the files of deleted conversations.
    async fn save_changes(
        path: &Path,
        prev: &DirectoryState,
        next: &DirectoryState,
    ) -> DirectoryResult<()> {
        let dir = messages_dir(path);
        for (id, list) in &next.messages {
            if prev.messages.get(id).is_some_and(|old| Arc::ptr_eq(old, list)) {
                continue;
            }
            let json = serde_json::to_vec(list.as_ref()).map_err(persistence)?;
            write_atomic(&message_file(&dir, id), json).await?;
        }

        let index = IndexFile {
            conversations: &next.conversations,
        };
        let json = serde_json::to_vec_pretty(&index).map_err(persistence)?;
        write_atomic(path, json).await?;

        for id in prev.messages.keys() {
            if next.messages.contains_key(id) {
                continue;
            }
            if let Err(e) = fs::remove_file(message_file(&dir, id)).await {
                warn!("Could not remove messages of deleted chat {}: {}", id, e);
            }
        }
        Ok(())
    }

    /// Apply `f` and make the result durable before it becomes visible.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut DirectoryState) -> DirectoryResult<T>,
    ) -> DirectoryResult<T> {
        let mut guard = self.state.write().await;
        match &self.path {
            None => f(&mut guard),
            Some(path) => {
                let mut next = guard.clone();
                let out = f(&mut next)?;
                if let Err(e) = Self::save_changes(path, &guard, &next).await {
                    error!("Directory write failed, change discarded: {}", e);
                    return Err(e);
                }
                *guard = next;
                Ok(out)
            }
        }
    }

    /// Create-or-get the one-to-one conversation between `actor` and `other`
    pub async fn access_direct(&self, actor: &str, other: &str) -> DirectoryResult<ConversationEntry> {
        let other = required(other, "userId")?;
        if other == actor {
            return Err(DirectoryError::Validation(
                "Cannot open a chat with yourself".to_string(),
            ));
        }

        {
            let state = self.state.read().await;
            if let Some(existing) = state
                .conversations
                .values()
                .find(|c| c.is_direct_between(actor, &other))
            {
                return Ok(state.entry(existing));
            }
        }

        self.mutate(|state| {
            // Re-check under the write lock; another request may have won.
            if let Some(existing) = state
                .conversations
                .values()
                .find(|c| c.is_direct_between(actor, &other))
            {
                return Ok(state.entry(existing));
            }

            let now = Utc::now();
            let record = ConversationRecord {
                id: Uuid::new_v4().to_string(),
                name: String::new(),
                is_group: false,
                members: vec![actor.to_string(), other.clone()],
                admin: None,
                latest_message_id: None,
                created_at: now,
                updated_at: now,
            };
            debug!("Created direct chat {} for {} and {}", record.id, actor, other);
            state.conversations.insert(record.id.clone(), record.clone());
            Ok(ConversationEntry {
                record,
                latest: None,
            })
        })
        .await
    }

    /// Conversations `actor` belongs to, most recently updated first
    pub async fn list_for(&self, actor: &str) -> Vec<ConversationEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .conversations
            .values()
            .filter(|c| c.has_member(actor))
            .map(|c| state.entry(c))
            .collect();
        entries.sort_by(|a, b| {
            b.record
                .updated_at
                .cmp(&a.record.updated_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        entries
    }

    pub async fn create_group(
        &self,
        actor: &str,
        name: &str,
        member_ids: &[UserId],
    ) -> DirectoryResult<ConversationEntry> {
        let name = required(name, "Group name")?;

        let mut members: Vec<UserId> = Vec::new();
        for id in member_ids {
            let id = id.trim();
            if id.is_empty() || id == actor || members.iter().any(|m| m == id) {
                continue;
            }
            members.push(id.to_string());
        }
        if members.len() < 2 {
            return Err(DirectoryError::Validation(
                "More than 2 users are required to form a group chat".to_string(),
            ));
        }
        members.push(actor.to_string());

        self.mutate(|state| {
            let now = Utc::now();
            let record = ConversationRecord {
                id: Uuid::new_v4().to_string(),
                name,
                is_group: true,
                members,
                admin: Some(actor.to_string()),
                latest_message_id: None,
                created_at: now,
                updated_at: now,
            };
            info!("Group chat {} created by {}", record.id, actor);
            state.conversations.insert(record.id.clone(), record.clone());
            Ok(ConversationEntry {
                record,
                latest: None,
            })
        })
        .await
    }

    pub async fn rename_group(
        &self,
        actor: &str,
        id: &str,
        name: &str,
    ) -> DirectoryResult<ConversationEntry> {
        let name = required(name, "Chat name")?;
        self.mutate(|state| {
            let record = state.authorize_admin_mut(actor, id)?;
            record.name = name;
            record.updated_at = Utc::now();
            let record = record.clone();
            Ok(state.entry(&record))
        })
        .await
    }

    pub async fn add_member(
        &self,
        actor: &str,
        id: &str,
        user_id: &str,
    ) -> DirectoryResult<ConversationEntry> {
        let user_id = required(user_id, "userId")?;
        self.mutate(|state| {
            let record = state.authorize_admin_mut(actor, id)?;
            if record.has_member(&user_id) {
                return Err(DirectoryError::Validation(
                    "User is already a member".to_string(),
                ));
            }
            record.members.push(user_id);
            record.updated_at = Utc::now();
            let record = record.clone();
            Ok(state.entry(&record))
        })
        .await
    }

    pub async fn remove_member(
        &self,
        actor: &str,
        id: &str,
        user_id: &str,
    ) -> DirectoryResult<ConversationEntry> {
        let user_id = required(user_id, "userId")?;
        self.mutate(|state| {
            let record = state.authorize_admin_mut(actor, id)?;
            if record.is_admin(&user_id) {
                return Err(DirectoryError::Validation(
                    "The admin cannot be removed from the group".to_string(),
                ));
            }
            if !record.has_member(&user_id) {
                return Err(DirectoryError::Validation(
                    "User is not a member".to_string(),
                ));
            }
            record.members.retain(|m| m != &user_id);
            record.updated_at = Utc::now();
            let record = record.clone();
            Ok(state.entry(&record))
        })
        .await
    }

    /// Same checks the admin-only mutations run, without mutating
    pub async fn check_admin(&self, actor: &str, id: &str) -> DirectoryResult<()> {
        let state = self.state.read().await;
        state.authorize_admin(actor, id).map(|_| ())
    }

    pub async fn get(&self, actor: &str, id: &str) -> DirectoryResult<ConversationEntry> {
        let state = self.state.read().await;
        let record = state.authorize(actor, id)?;
        Ok(state.entry(record))
    }

    /// Update mutable fields. Groups need the admin; direct chats have no
    /// renameable fields, so a name there is rejected.
    pub async fn update(
        &self,
        actor: &str,
        id: &str,
        name: Option<&str>,
    ) -> DirectoryResult<ConversationEntry> {
        let name = name.map(|n| required(n, "Chat name")).transpose()?;
        self.mutate(|state| {
            let record = state.authorize_mut(actor, id)?;
            if record.is_group && !record.is_admin(actor) {
                return Err(DirectoryError::Forbidden(
                    "Only the group admin can do this".to_string(),
                ));
            }
            if let Some(name) = name {
                if !record.is_group {
                    return Err(DirectoryError::Validation(
                        "Direct chats cannot be renamed".to_string(),
                    ));
                }
                record.name = name;
                record.updated_at = Utc::now();
            }
            let record = record.clone();
            Ok(state.entry(&record))
        })
        .await
    }

    /// Delete a conversation and every message in it
    pub async fn delete(&self, actor: &str, id: &str) -> DirectoryResult<ConversationRecord> {
        self.mutate(|state| {
            let record = state.authorize(actor, id)?;
            if record.is_group && !record.is_admin(actor) {
                return Err(DirectoryError::Forbidden(
                    "Only the group admin can do this".to_string(),
                ));
            }

            let record = state
                .conversations
                .remove(id)
                .ok_or_else(|| DirectoryError::NotFound(format!("Chat {} not found", id)))?;
            let removed = state.messages.remove(id).map_or(0, |m| m.len());
            info!("Chat {} deleted with {} messages", id, removed);
            Ok(record)
        })
        .await
    }

    /// Durable send. Assigns a creation time strictly after the previous
    /// message in the same conversation.
    pub async fn send_message(
        &self,
        actor: &str,
        conversation_id: &str,
        content: &str,
    ) -> DirectoryResult<MessageRecord> {
        let conversation_id = required(conversation_id, "chatId")?;
        let content = required(content, "Message content")?;

        self.mutate(|state| {
            state.authorize(actor, &conversation_id)?;

            let mut created_at = Utc::now();
            if let Some(last) = state.messages.get(&conversation_id).and_then(|m| m.last()) {
                if created_at <= last.created_at {
                    created_at = last.created_at + Duration::microseconds(1);
                }
            }

            let message = MessageRecord {
                id: Uuid::new_v4().to_string(),
                sender: actor.to_string(),
                conversation_id: conversation_id.clone(),
                content,
                created_at,
            };

            let list = state.messages.entry(conversation_id.clone()).or_default();
            Arc::make_mut(list).push(message.clone());
            if let Some(record) = state.conversations.get_mut(&conversation_id) {
                record.latest_message_id = Some(message.id.clone());
                record.updated_at = created_at;
            }
            Ok(message)
        })
        .await
    }

    /// Messages of a conversation in creation order
    pub async fn list_messages(&self, actor: &str, id: &str) -> DirectoryResult<Vec<MessageRecord>> {
        let state = self.state.read().await;
        state.authorize(actor, id)?;
        Ok(state.messages.get(id).map(|m| m.to_vec()).unwrap_or_default())
    }

    /// Persisted message `id` of `conversation_id`, without authorization
    pub async fn message(&self, conversation_id: &str, id: &str) -> Option<MessageRecord> {
        let state = self.state.read().await;
        state
            .messages
            .get(conversation_id)?
            .iter()
            .rev()
            .find(|m| m.id == id)
            .cloned()
    }

    /// Current members, without authorization
    pub async fn members(&self, conversation_id: &str) -> Option<Vec<UserId>> {
        self.state
            .read()
            .await
            .conversations
            .get(conversation_id)
            .map(|c| c.members.clone())
    }
}
