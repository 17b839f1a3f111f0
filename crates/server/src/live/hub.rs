//! Live hub
//!
//! Owns the Presence Registry, the Room Membership Index and the outbound
//! queue of every connection behind one lock, so join/leave/register/
//! disconnect and fan-out snapshots are atomic with respect to each other.
//! Sends happen after the lock is released and never block: a full queue
//! drops the event.

use super::connection::ConnectionId;
use super::presence::PresenceRegistry;
use super::rooms::RoomIndex;
use parking_lot::Mutex;
use parley_common::{ConversationId, ServerEvent, UserId};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Peer {
    /// Identity proven by bearer token at handshake
    authenticated: Option<UserId>,
    tx: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
struct HubState {
    peers: HashMap<ConnectionId, Peer>,
    presence: PresenceRegistry,
    rooms: RoomIndex,
}

/// What a disconnect removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub user: Option<UserId>,
    pub rooms_left: usize,
}

pub struct LiveHub {
    state: Mutex<HubState>,
    send_queue: usize,
}

impl LiveHub {
    pub fn new(send_queue: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            send_queue: send_queue.max(1),
        }
    }

    /// Admit a new connection and hand back its outbound queue.
    pub fn connect(&self, authenticated: Option<UserId>) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.send_queue);
        self.state
            .lock()
            .peers
            .insert(id.clone(), Peer { authenticated, tx });
        (id, rx)
    }

    pub fn authenticated_user(&self, conn: &ConnectionId) -> Option<UserId> {
        self.state
            .lock()
            .peers
            .get(conn)
            .and_then(|p| p.authenticated.clone())
    }

    /// Identity the connection is registered under in presence
    pub fn registered_user(&self, conn: &ConnectionId) -> Option<UserId> {
        self.state.lock().presence.user_of(conn).cloned()
    }

    /// Returns false for a connection that is no longer (or never was) live.
    pub fn register(&self, conn: &ConnectionId, user: &str) -> bool {
        let mut state = self.state.lock();
        if !state.peers.contains_key(conn) {
            return false;
        }
        state.presence.register(user, conn);
        true
    }

    pub fn join(&self, conn: &ConnectionId, room: &str) -> bool {
        let mut state = self.state.lock();
        if !state.peers.contains_key(conn) {
            return false;
        }
        state.rooms.join(conn, room)
    }

    pub fn leave(&self, conn: &ConnectionId, room: &str) -> bool {
        self.state.lock().rooms.leave(conn, room)
    }

    /// Remove the connection from presence, every room and the peer table.
    ///
    /// Idempotent: `None` when it was already gone. Dropping the peer closes
    /// its queue, which ends the connection's writer.
    pub fn disconnect(&self, conn: &ConnectionId) -> Option<Departure> {
        let mut state = self.state.lock();
        let peer = state.peers.remove(conn)?;
        let user = state.presence.unregister(conn);
        let rooms_left = state.rooms.leave_all(conn);
        drop(state);
        drop(peer);

        Some(Departure { user, rooms_left })
    }

    pub fn is_connected(&self, conn: &ConnectionId) -> bool {
        self.state.lock().peers.contains_key(conn)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn subscribers(&self, room: &str) -> Vec<ConnectionId> {
        self.state.lock().rooms.subscribers(room)
    }

    pub fn list_connections(&self, user: &str) -> Vec<ConnectionId> {
        self.state.lock().presence.list_connections(user)
    }

    pub fn rooms_of(&self, conn: &ConnectionId) -> Vec<ConversationId> {
        self.state.lock().rooms.rooms_of(conn)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.state.lock().presence.online_users()
    }

    /// Deliver to the room's subscribers, minus `except`.
    pub fn fan_out(&self, room: &str, except: Option<&ConnectionId>, event: ServerEvent) -> usize {
        self.fan_out_with_members(room, &[], except, event)
    }

    /// Deliver to the room's subscribers plus every registered connection of
    /// `members`, each at most once, minus `except`.
    pub fn fan_out_with_members(
        &self,
        room: &str,
        members: &[UserId],
        except: Option<&ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        let targets = {
            let state = self.state.lock();
            let mut seen: HashSet<ConnectionId> = HashSet::new();
            let mut ids = state.rooms.subscribers(room);
            for member in members {
                ids.extend(state.presence.list_connections(member));
            }
            ids.into_iter()
                .filter(|id| Some(id) != except)
                .filter(|id| seen.insert(id.clone()))
                .filter_map(|id| state.peers.get(&id).map(|p| (id, p.tx.clone())))
                .collect::<Vec<_>>()
        };
        Self::send_all(targets, event)
    }

    /// Send the current online list to every connection.
    pub fn broadcast_presence(&self) -> usize {
        let (online_users, targets) = {
            let state = self.state.lock();
            let targets: Vec<_> = state
                .peers
                .iter()
                .map(|(id, p)| (id.clone(), p.tx.clone()))
                .collect();
            (state.presence.online_users(), targets)
        };
        Self::send_all(targets, ServerEvent::Presence { online_users })
    }

    fn send_all(targets: Vec<(ConnectionId, mpsc::Sender<ServerEvent>)>, event: ServerEvent) -> usize {
        let mut delivered = 0;
        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = %id, event = event.kind(), "Send queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = %id, "Connection closed before delivery");
                }
            }
        }
        delivered
    }
}
