//! Chat Directory Service
//!
//! Owns persisted conversations and messages. The REST handlers populate
//! stored records into wire views; the Event Router reads membership and
//! persisted messages from the same store.

pub mod handlers;
pub mod store;
pub mod views;

pub use store::{
    ConversationEntry, ConversationRecord, DirectoryError, DirectoryResult, DirectoryStore,
    MessageRecord,
};

use crate::core::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};

/// Directory routes; mounted behind `mw_require_auth`
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/chat",
            post(handlers::access_direct).get(handlers::list_conversations),
        )
        .route("/chat/group", post(handlers::create_group))
        .route("/chat/rename", put(handlers::rename_group))
        .route("/chat/groupadd", put(handlers::add_member))
        .route("/chat/groupremove", put(handlers::remove_member))
        .route(
            "/chat/{id}",
            get(handlers::get_conversation)
                .put(handlers::update_conversation)
                .delete(handlers::delete_conversation),
        )
        .route("/message", post(handlers::send_message))
        .route("/message/{chat_id}", get(handlers::list_messages))
}
