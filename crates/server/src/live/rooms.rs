//! Room Membership Index
//!
//! Conversation id -> subscribed connections, with the reverse map so a
//! disconnect can leave every room without scanning.

use super::connection::ConnectionId;
use parley_common::ConversationId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct RoomIndex {
    rooms: HashMap<ConversationId, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<ConversationId>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already subscribed.
    pub fn join(&mut self, conn: &ConnectionId, room: &str) -> bool {
        let added = self
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn.clone());
        self.joined
            .entry(conn.clone())
            .or_default()
            .insert(room.to_string());
        added
    }

    pub fn leave(&mut self, conn: &ConnectionId, room: &str) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(subs) => {
                let removed = subs.remove(conn);
                if subs.is_empty() {
                    self.rooms.remove(room);
                }
                removed
            }
            None => false,
        };
        if let Some(rooms) = self.joined.get_mut(conn) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.joined.remove(conn);
            }
        }
        removed
    }

    /// Remove the connection from every room; returns how many it was in.
    pub fn leave_all(&mut self, conn: &ConnectionId) -> usize {
        let Some(rooms) = self.joined.remove(conn) else {
            return 0;
        };
        for room in &rooms {
            if let Some(subs) = self.rooms.get_mut(room) {
                subs.remove(conn);
                if subs.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        rooms.len()
    }

    pub fn subscribers(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, conn: &ConnectionId) -> Vec<ConversationId> {
        let mut rooms: Vec<_> = self
            .joined
            .get(conn)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
