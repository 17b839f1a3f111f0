//! Event Router
//!
//! Turns one inbound live event into zero or more outbound events. The live
//! channel is a notification layer: messages are persisted through
//! `POST /message` first, and `sendLive` only fans out the stored copy.
//! Bad events are dropped with a warning and never end the connection.

use super::connection::ConnectionId;
use super::hub::LiveHub;
use crate::core::auth::AuthManager;
use crate::directory::views::message_view;
use crate::directory::DirectoryStore;
use parley_common::{ClientEvent, LiveMessageRef, ServerEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of routing one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Rejected; the reason is logged
    Dropped(&'static str),
    /// Handled with no outbound traffic
    Silent,
    /// Number of connections the outbound event was queued for
    Delivered(usize),
}

pub struct EventRouter {
    hub: Arc<LiveHub>,
    directory: Arc<DirectoryStore>,
    auth: Arc<AuthManager>,
}

impl EventRouter {
    pub fn new(hub: Arc<LiveHub>, directory: Arc<DirectoryStore>, auth: Arc<AuthManager>) -> Self {
        Self {
            hub,
            directory,
            auth,
        }
    }

    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// Parse one text frame and dispatch it.
    pub async fn handle_text(&self, conn: &ConnectionId, text: &str) -> Outcome {
        match ClientEvent::parse(text) {
            Ok(event) => self.dispatch(conn, event).await,
            Err(e) => {
                warn!(connection = %conn, "Dropping live event: {}", e);
                Outcome::Dropped("malformed")
            }
        }
    }

    pub async fn dispatch(&self, conn: &ConnectionId, event: ClientEvent) -> Outcome {
        if let Err(e) = event.validate() {
            warn!(connection = %conn, "Dropping live event: {}", e);
            return Outcome::Dropped("malformed");
        }
        debug!(connection = %conn, event = event.kind(), "Live event");

        let outcome = match event {
            ClientEvent::Identify { user_id } => self.identify(conn, &user_id),
            ClientEvent::JoinRoom { conversation_id } => {
                if self.hub.join(conn, &conversation_id) {
                    debug!(connection = %conn, room = %conversation_id, "Joined room");
                }
                Outcome::Silent
            }
            ClientEvent::LeaveRoom { conversation_id } => {
                self.hub.leave(conn, &conversation_id);
                Outcome::Silent
            }
            ClientEvent::SendLive { message } => self.send_live(conn, message).await,
            ClientEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => self.typing(conn, conversation_id, user_id, is_typing),
        };

        if let Outcome::Dropped(reason) = &outcome {
            warn!(connection = %conn, reason = *reason, "Live event dropped");
        }
        outcome
    }

    fn identify(&self, conn: &ConnectionId, user_id: &str) -> Outcome {
        match self.hub.authenticated_user(conn) {
            Some(authenticated) if authenticated == user_id => {}
            Some(_) => return Outcome::Dropped("identity mismatch"),
            None => return Outcome::Dropped("anonymous connection"),
        }
        if !self.hub.register(conn, user_id) {
            return Outcome::Dropped("connection gone");
        }
        info!(connection = %conn, user = %user_id, "User online");
        Outcome::Delivered(self.hub.broadcast_presence())
    }

    async fn send_live(&self, conn: &ConnectionId, message: LiveMessageRef) -> Outcome {
        // Suspension points below hold no hub lock.
        let Some(record) = self
            .directory
            .message(&message.conversation_id, &message.id)
            .await
        else {
            return Outcome::Dropped("unknown message");
        };
        let members = self
            .directory
            .members(&record.conversation_id)
            .await
            .unwrap_or_default();

        let view = match message_view(&self.auth, &record).await {
            Ok(view) => view,
            Err(e) => {
                warn!(connection = %conn, "Could not populate message {}: {}", record.id, e);
                return Outcome::Dropped("population failed");
            }
        };

        let delivered = self.hub.fan_out_with_members(
            &record.conversation_id,
            &members,
            Some(conn),
            ServerEvent::MessageDelivered { message: view },
        );
        debug!(message = %record.id, delivered, "Message fanned out");
        Outcome::Delivered(delivered)
    }

    /// Stateless relay. The sender's proven or registered identity wins
    /// over whatever the payload claims.
    fn typing(
        &self,
        conn: &ConnectionId,
        conversation_id: String,
        claimed: String,
        is_typing: bool,
    ) -> Outcome {
        let user_id = self
            .hub
            .authenticated_user(conn)
            .or_else(|| self.hub.registered_user(conn))
            .unwrap_or(claimed);
        if user_id.trim().is_empty() {
            return Outcome::Dropped("unknown typist");
        }

        let delivered = self.hub.fan_out(
            &conversation_id,
            Some(conn),
            ServerEvent::TypingStatus {
                conversation_id: conversation_id.clone(),
                user_id,
                is_typing,
            },
        );
        Outcome::Delivered(delivered)
    }

    /// Unwind presence and rooms for a closed connection. Idempotent.
    pub fn disconnect(&self, conn: &ConnectionId) -> Outcome {
        match self.hub.disconnect(conn) {
            Some(departure) => {
                info!(
                    connection = %conn,
                    user = ?departure.user,
                    rooms = departure.rooms_left,
                    "Connection closed"
                );
                Outcome::Delivered(self.hub.broadcast_presence())
            }
            None => Outcome::Silent,
        }
    }
}
