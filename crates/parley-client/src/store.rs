//! Client Reconciliation Store
//!
//! Client-side state merging fetched history with live events:
//!
//! - conversation summaries, most recent first, with cached latest message
//!   and unread counters
//! - one message thread per conversation that has been opened, each with a
//!   [`LoadState`]
//! - live connection status, online users and who is typing
//!
//! Pure and synchronous: callers perform the I/O and feed results back in.
//! A thread is a single sequence ordered by `(created_at, id)` with
//! insert-if-absent semantics, so an optimistic local append and the server
//! copy of the same message can never both appear.

use parley_common::{ConversationId, ConversationView, MessageId, MessageView, ServerEvent, UserId};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What the caller should do after [`ReconciliationStore::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAction {
    /// Fetch history, then report via `history_loaded` / `history_failed`
    Fetch,
    /// A fetch is already in flight
    AlreadyLoading,
    /// History is cached and current
    Cached,
}

/// How an applied event changed the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Appended to the open conversation
    Appended,
    /// Already present; nothing changed
    Duplicate,
    /// Counted as unread on a conversation that is not open
    Unread { conversation_id: ConversationId, count: u32 },
    /// The conversation is not in the summary list yet; its unread count is
    /// held until it shows up
    UnknownConversation(ConversationId),
    PresenceChanged,
    TypingChanged,
    Ignored,
}

/// What a reconnect invalidated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resync {
    /// Cached threads other than the open one, now `NotLoaded`
    pub stale: usize,
    /// Open conversation whose history must be fetched again
    pub refetch: Option<ConversationId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub conversation: ConversationView,
    pub latest_message: Option<MessageView>,
    pub unread_count: u32,
}

impl ConversationSummary {
    fn new(conversation: ConversationView) -> Self {
        let latest_message = conversation.latest_message.clone();
        Self {
            conversation,
            latest_message,
            unread_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.conversation.id
    }

    /// Newer of the cached latest and `candidate`
    fn offer_latest(&mut self, candidate: &MessageView) {
        let newer = match &self.latest_message {
            Some(current) => order_key(candidate) >= order_key(current),
            None => true,
        };
        if newer {
            self.latest_message = Some(candidate.clone());
        }
    }

    fn activity(&self) -> chrono::DateTime<chrono::Utc> {
        self.latest_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.conversation.updated_at)
            .max(self.conversation.updated_at)
    }
}

fn order_key(m: &MessageView) -> (chrono::DateTime<chrono::Utc>, &str) {
    (m.created_at, m.id.as_str())
}

/// Messages ordered by `(created_at, id)`, at most one per id
#[derive(Debug, Clone, Default)]
pub struct MessageList {
    items: Vec<MessageView>,
    ids: HashSet<MessageId>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert if absent. Returns false for a known id.
    pub fn upsert(&mut self, message: MessageView) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        let key = order_key(&message);
        let at = self.items.partition_point(|m| order_key(m) < key);
        self.ids.insert(message.id.clone());
        self.items.insert(at, message);
        true
    }

    /// Upsert every message; returns how many were new.
    pub fn merge(&mut self, messages: impl IntoIterator<Item = MessageView>) -> usize {
        messages.into_iter().filter(|m| self.upsert(m.clone())).count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&MessageView> {
        self.items.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageView> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[MessageView] {
        &self.items
    }
}

#[derive(Debug, Default)]
struct Thread {
    state: LoadState,
    messages: MessageList,
}

#[derive(Debug, Default)]
struct PendingUnread {
    ids: HashSet<MessageId>,
    latest: Option<MessageView>,
}

#[derive(Debug, Default)]
pub struct ReconciliationStore {
    me: Option<UserId>,
    /// Most recent activity first
    summaries: Vec<ConversationSummary>,
    threads: HashMap<ConversationId, Thread>,
    open: Option<ConversationId>,
    /// Message ids already counted as unread, per conversation
    unread_seen: HashMap<ConversationId, HashSet<MessageId>>,
    pending: HashMap<ConversationId, PendingUnread>,
    live_status: LiveStatus,
    has_connected: bool,
    online_users: Vec<UserId>,
    typing: HashMap<ConversationId, BTreeSet<UserId>>,
}

impl ReconciliationStore {
    pub fn new(me: impl Into<UserId>) -> Self {
        Self {
            me: Some(me.into()),
            ..Self::default()
        }
    }

    pub fn me(&self) -> Option<&str> {
        self.me.as_deref()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.summaries.iter().position(|s| s.id() == id)
    }

    fn move_to_front(&mut self, index: usize) {
        if index > 0 {
            let summary = self.summaries.remove(index);
            self.summaries.insert(0, summary);
        }
    }

    fn sort_summaries(&mut self) {
        self.summaries.sort_by(|a, b| {
            b.activity()
                .cmp(&a.activity())
                .then_with(|| a.id().cmp(b.id()))
        });
    }

    /// Fold in held unread counts for a conversation that just appeared
    fn take_pending(&mut self, id: &str) {
        let Some(pending) = self.pending.remove(id) else {
            return;
        };
        let Some(index) = self.position(id) else {
            return;
        };
        let is_open = self.open.as_deref() == Some(id);
        let seen = self.unread_seen.entry(id.to_string()).or_default();
        let mut added = 0;
        for mid in pending.ids {
            if seen.insert(mid) {
                added += 1;
            }
        }
        let summary = &mut self.summaries[index];
        if !is_open {
            summary.unread_count += added;
        }
        if let Some(latest) = &pending.latest {
            summary.offer_latest(latest);
        }
    }

    // --- conversation list ---

    /// Replace the list from a fresh fetch. Unread counts carry over by id.
    pub fn set_conversations(&mut self, conversations: Vec<ConversationView>) {
        let mut previous: HashMap<ConversationId, ConversationSummary> = self
            .summaries
            .drain(..)
            .map(|s| (s.conversation.id.clone(), s))
            .collect();

        self.summaries = conversations
            .into_iter()
            .map(|view| {
                let mut summary = ConversationSummary::new(view);
                if let Some(old) = previous.remove(&summary.conversation.id) {
                    summary.unread_count = old.unread_count;
                    if let Some(latest) = &old.latest_message {
                        summary.offer_latest(latest);
                    }
                }
                summary
            })
            .collect();

        for gone in previous.keys() {
            self.forget(gone);
        }
        let known: Vec<ConversationId> = self.summaries.iter().map(|s| s.id().to_string()).collect();
        for id in &known {
            self.take_pending(id);
        }
        self.sort_summaries();
    }

    /// Insert or replace one conversation and move it to the front
    pub fn upsert_conversation(&mut self, view: ConversationView) {
        let id = view.id.clone();
        match self.position(&id) {
            Some(index) => {
                let summary = &mut self.summaries[index];
                let cached = summary.latest_message.take();
                summary.latest_message = view.latest_message.clone();
                summary.conversation = view;
                if let Some(latest) = &cached {
                    summary.offer_latest(latest);
                }
                self.move_to_front(index);
            }
            None => {
                self.summaries.insert(0, ConversationSummary::new(view));
                self.take_pending(&id);
            }
        }
    }

    pub fn remove_conversation(&mut self, id: &str) {
        if let Some(index) = self.position(id) {
            self.summaries.remove(index);
        }
        self.forget(id);
    }

    fn forget(&mut self, id: &str) {
        self.threads.remove(id);
        self.unread_seen.remove(id);
        self.pending.remove(id);
        self.typing.remove(id);
        if self.open.as_deref() == Some(id) {
            self.open = None;
        }
    }

    // --- open thread lifecycle ---

    /// Make `id` the open conversation. Unread resets to zero immediately,
    /// whatever happens to the history fetch.
    pub fn open(&mut self, id: &str) -> OpenAction {
        self.open = Some(id.to_string());
        if let Some(index) = self.position(id) {
            self.summaries[index].unread_count = 0;
        }
        self.unread_seen.remove(id);
        if let Some(pending) = self.pending.get_mut(id) {
            pending.ids.clear();
        }

        let thread = self.threads.entry(id.to_string()).or_default();
        match thread.state {
            LoadState::NotLoaded | LoadState::Error(_) => {
                thread.state = LoadState::Loading;
                OpenAction::Fetch
            }
            LoadState::Loading => OpenAction::AlreadyLoading,
            LoadState::Loaded => OpenAction::Cached,
        }
    }

    /// Merge fetched history with anything that arrived live meanwhile.
    pub fn history_loaded(&mut self, id: &str, history: Vec<MessageView>) {
        let thread = self.threads.entry(id.to_string()).or_default();
        let added = thread.messages.merge(history);
        thread.state = LoadState::Loaded;
        let last = thread.messages.last().cloned();
        debug!(conversation = %id, added, "History loaded");

        if let (Some(index), Some(last)) = (self.position(id), last) {
            self.summaries[index].offer_latest(&last);
        }
    }

    pub fn history_failed(&mut self, id: &str, error: impl Into<String>) {
        let thread = self.threads.entry(id.to_string()).or_default();
        if thread.state == LoadState::Loading {
            thread.state = LoadState::Error(error.into());
        }
    }

    /// Error -> Loading. Returns whether a fetch should be issued.
    pub fn retry(&mut self, id: &str) -> bool {
        match self.threads.get_mut(id) {
            Some(thread) if matches!(thread.state, LoadState::Error(_)) => {
                thread.state = LoadState::Loading;
                true
            }
            _ => false,
        }
    }

    pub fn close(&mut self) -> Option<ConversationId> {
        self.open.take()
    }

    // --- messages ---

    /// Record the caller's own durable send. Never counts as unread.
    pub fn apply_local_send(&mut self, message: MessageView) -> bool {
        let id = message.conversation_id.clone();
        if let Some(index) = self.position(&id) {
            self.summaries[index].offer_latest(&message);
            self.move_to_front(index);
        }
        self.threads
            .entry(id)
            .or_default()
            .messages
            .upsert(message)
    }

    pub fn apply_event(&mut self, event: ServerEvent) -> Effect {
        match event {
            ServerEvent::Presence { online_users } => {
                self.online_users = online_users;
                Effect::PresenceChanged
            }
            ServerEvent::TypingStatus {
                conversation_id,
                user_id,
                is_typing,
            } => {
                if self.me.as_deref() == Some(user_id.as_str()) {
                    return Effect::Ignored;
                }
                let typists = self.typing.entry(conversation_id.clone()).or_default();
                let changed = if is_typing {
                    typists.insert(user_id)
                } else {
                    typists.remove(&user_id)
                };
                if typists.is_empty() {
                    self.typing.remove(&conversation_id);
                }
                if changed {
                    Effect::TypingChanged
                } else {
                    Effect::Ignored
                }
            }
            ServerEvent::MessageDelivered { message } => self.apply_message(message),
        }
    }

    fn apply_message(&mut self, message: MessageView) -> Effect {
        let id = message.conversation_id.clone();
        if let Some(typists) = self.typing.get_mut(&id) {
            typists.remove(&message.sender.id);
        }

        if self.open.as_deref() == Some(id.as_str()) {
            let thread = self.threads.entry(id.clone()).or_default();
            let fresh = thread.messages.upsert(message.clone());
            if let Some(index) = self.position(&id) {
                self.summaries[index].offer_latest(&message);
                self.move_to_front(index);
            }
            return if fresh { Effect::Appended } else { Effect::Duplicate };
        }

        // Keep caches of other threads current; the open list is untouched.
        if let Some(thread) = self.threads.get_mut(&id) {
            if matches!(thread.state, LoadState::Loaded | LoadState::Loading) {
                thread.messages.upsert(message.clone());
            }
        }

        let Some(index) = self.position(&id) else {
            let pending = self.pending.entry(id.clone()).or_default();
            pending.ids.insert(message.id.clone());
            let newer = pending
                .latest
                .as_ref()
                .map_or(true, |l| order_key(&message) >= order_key(l));
            if newer {
                pending.latest = Some(message);
            }
            return Effect::UnknownConversation(id);
        };

        let seen = self.unread_seen.entry(id.clone()).or_default();
        if !seen.insert(message.id.clone()) {
            return Effect::Duplicate;
        }
        let summary = &mut self.summaries[index];
        summary.unread_count += 1;
        summary.offer_latest(&message);
        let count = summary.unread_count;
        self.move_to_front(index);
        Effect::Unread {
            conversation_id: id,
            count,
        }
    }

    // --- live status ---

    /// Live events may have been missed while disconnected, so a reconnect
    /// marks other cached threads stale and puts the open one back to
    /// `Loading`; its messages stay visible until the refetch merges in.
    pub fn set_live_status(&mut self, status: LiveStatus) -> Resync {
        let previous = self.live_status;
        self.live_status = status;
        match status {
            LiveStatus::Connected if previous != LiveStatus::Connected => {
                let reconnect = self.has_connected;
                self.has_connected = true;
                if !reconnect {
                    return Resync::default();
                }
                let open = self.open.clone();
                let mut resync = Resync::default();
                for (id, thread) in self.threads.iter_mut() {
                    if Some(id) == open.as_ref() {
                        thread.state = LoadState::Loading;
                        resync.refetch = Some(id.clone());
                    } else if thread.state == LoadState::Loaded {
                        thread.state = LoadState::NotLoaded;
                        resync.stale += 1;
                    }
                }
                resync
            }
            LiveStatus::Disconnected => {
                self.online_users.clear();
                self.typing.clear();
                Resync::default()
            }
            _ => Resync::default(),
        }
    }

    // --- accessors ---

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn summary(&self, id: &str) -> Option<&ConversationSummary> {
        self.summaries.iter().find(|s| s.id() == id)
    }

    pub fn unread_count(&self, id: &str) -> u32 {
        self.summary(id).map(|s| s.unread_count).unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.summaries.iter().map(|s| s.unread_count).sum()
    }

    pub fn open_conversation(&self) -> Option<&str> {
        self.open.as_deref()
    }

    pub fn load_state(&self, id: &str) -> LoadState {
        self.threads
            .get(id)
            .map(|t| t.state.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self, id: &str) -> Option<&MessageList> {
        self.threads.get(id).map(|t| &t.messages)
    }

    pub fn open_messages(&self) -> Option<&MessageList> {
        self.open.as_deref().and_then(|id| self.messages(id))
    }

    pub fn live_status(&self) -> LiveStatus {
        self.live_status
    }

    pub fn online_users(&self) -> &[UserId] {
        &self.online_users
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online_users.iter().any(|u| u == user_id)
    }

    pub fn typing_in(&self, id: &str) -> Vec<UserId> {
        self.typing
            .get(id)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }
}
