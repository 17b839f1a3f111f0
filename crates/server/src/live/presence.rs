//! Presence Registry
//!
//! Maps user identities to their live connections. Not synchronised on its
//! own; [`LiveHub`](super::LiveHub) owns it behind the hub lock.

use super::connection::ConnectionId;
use parley_common::UserId;
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, UserId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. A connection re-registered under another identity moves.
    pub fn register(&mut self, user: &str, conn: &ConnectionId) {
        if let Some(previous) = self.by_connection.get(conn) {
            if previous == user {
                return;
            }
            warn!(connection = %conn, from = %previous, to = %user, "Connection changed identity");
            self.unregister(conn);
        }
        self.by_user
            .entry(user.to_string())
            .or_default()
            .insert(conn.clone());
        self.by_connection.insert(conn.clone(), user.to_string());
    }

    /// Returns the identity the connection was registered under, if any.
    pub fn unregister(&mut self, conn: &ConnectionId) -> Option<UserId> {
        let user = self.by_connection.remove(conn)?;
        if let Some(conns) = self.by_user.get_mut(&user) {
            conns.remove(conn);
            if conns.is_empty() {
                self.by_user.remove(&user);
            }
        }
        Some(user)
    }

    pub fn list_connections(&self, user: &str) -> Vec<ConnectionId> {
        self.by_user
            .get(user)
            .map(|conns| conns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_of(&self, conn: &ConnectionId) -> Option<&UserId> {
        self.by_connection.get(conn)
    }

    /// Sorted identities with at least one connection
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.by_user.keys().cloned().collect();
        users.sort();
        users
    }
}
