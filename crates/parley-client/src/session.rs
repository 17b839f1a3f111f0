use crate::api::RestClient;
use crate::error::{ClientError, Result};
use crate::live::LiveSink;
use crate::store::{Effect, LiveStatus, OpenAction, ReconciliationStore};
use parley_common::{ClientEvent, MessageView, ServerEvent, UserId};
use tracing::{debug, warn};

/// One signed-in user's chat: REST calls, live events and the store.
pub struct ChatSession<S: LiveSink> {
    rest: RestClient,
    live: S,
    store: ReconciliationStore,
    me: UserId,
}

impl<S: LiveSink> ChatSession<S> {
    pub fn new(rest: RestClient, live: S, me: impl Into<UserId>) -> Self {
        let me = me.into();
        Self {
            rest,
            live,
            store: ReconciliationStore::new(me.clone()),
            me,
        }
    }

    pub fn store(&self) -> &ReconciliationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ReconciliationStore {
        &mut self.store
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    /// Announce this user on the live channel
    pub fn identify(&self) -> Result<()> {
        self.live.send(ClientEvent::Identify {
            user_id: self.me.clone(),
        })
    }

    /// Live events are best effort; REST stays the path of record.
    fn notify(&self, event: ClientEvent) {
        let kind = event.kind();
        if let Err(e) = self.live.send(event) {
            warn!("Live {} not sent: {}", kind, e);
        }
    }

    /// Swap in the sink of a freshly opened live channel
    pub fn set_live(&mut self, live: S) {
        self.live = live;
    }

    pub fn live_connecting(&mut self) {
        self.store.set_live_status(LiveStatus::Connecting);
    }

    /// Call once the live channel is up, after every (re)connect. Rejoins
    /// the open room, announces the user and, after a reconnect, refetches
    /// the open history that live events may have missed.
    pub async fn live_connected(&mut self) -> Result<()> {
        let resync = self.store.set_live_status(LiveStatus::Connected);
        if let Some(id) = self.store.open_conversation() {
            self.notify(ClientEvent::JoinRoom {
                conversation_id: id.to_string(),
            });
        }
        self.notify(ClientEvent::Identify {
            user_id: self.me.clone(),
        });
        if resync.stale > 0 {
            debug!(stale = resync.stale, "Cached threads marked stale");
        }
        match resync.refetch {
            Some(id) => self.fetch_history(&id).await,
            None => Ok(()),
        }
    }

    pub fn live_disconnected(&mut self) {
        self.store.set_live_status(LiveStatus::Disconnected);
    }

    pub async fn refresh_conversations(&mut self) -> Result<()> {
        let conversations = self.rest.list_conversations().await?;
        self.store.set_conversations(conversations);
        Ok(())
    }

    /// Switch rooms and load history if needed. Unread for `id` is zero
    /// afterwards even if the fetch fails.
    pub async fn open_conversation(&mut self, id: &str) -> Result<()> {
        let previous = self.store.open_conversation().map(str::to_string);
        let action = self.store.open(id);

        if let Some(previous) = previous.filter(|p| p != id) {
            self.notify(ClientEvent::LeaveRoom {
                conversation_id: previous,
            });
        }
        self.notify(ClientEvent::JoinRoom {
            conversation_id: id.to_string(),
        });

        match action {
            OpenAction::Fetch => self.fetch_history(id).await,
            OpenAction::AlreadyLoading | OpenAction::Cached => Ok(()),
        }
    }

    pub async fn retry_open(&mut self) -> Result<()> {
        let id = self
            .store
            .open_conversation()
            .map(str::to_string)
            .ok_or(ClientError::NoConversationOpen)?;
        if self.store.retry(&id) {
            self.fetch_history(&id).await?;
        }
        Ok(())
    }

    async fn fetch_history(&mut self, id: &str) -> Result<()> {
        match self.rest.list_messages(id).await {
            Ok(history) => {
                self.store.history_loaded(id, history);
                Ok(())
            }
            Err(e) => {
                self.store.history_failed(id, e.to_string());
                Err(e)
            }
        }
    }

    pub fn close_conversation(&mut self) {
        if let Some(id) = self.store.close() {
            self.notify(ClientEvent::LeaveRoom { conversation_id: id });
        }
    }

    /// Durable send first, then the live notification. A failed live send
    /// is only logged: the message is stored and recipients will fetch it.
    pub async fn send_message(&mut self, content: &str) -> Result<MessageView> {
        let id = self
            .store
            .open_conversation()
            .map(str::to_string)
            .ok_or(ClientError::NoConversationOpen)?;

        let message = self.rest.send_message(&id, content).await?;
        self.store.apply_local_send(message.clone());
        self.notify(ClientEvent::SendLive {
            message: (&message).into(),
        });
        Ok(message)
    }

    pub fn set_typing(&self, is_typing: bool) -> Result<()> {
        let conversation_id = self
            .store
            .open_conversation()
            .ok_or(ClientError::NoConversationOpen)?;
        self.live.send(ClientEvent::Typing {
            conversation_id: conversation_id.to_string(),
            user_id: self.me.clone(),
            is_typing,
        })
    }

    /// Apply a server event. A message for a conversation this client has
    /// not seen yet triggers a list refresh.
    pub async fn handle_event(&mut self, event: ServerEvent) -> Result<Effect> {
        let effect = self.store.apply_event(event);
        if let Effect::UnknownConversation(id) = &effect {
            debug!(conversation = %id, "Message for unknown conversation, refreshing list");
            self.refresh_conversations().await?;
        }
        Ok(effect)
    }
}
