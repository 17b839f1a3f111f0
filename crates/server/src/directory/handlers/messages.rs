use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use crate::directory::views::{message_view, Populator};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use parley_common::MessageView;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub content: String,
}

/// POST /message
///
/// The durable half of a send. Live fan-out happens afterwards when the
/// client emits `sendLive` with the returned message.
pub async fn send_message(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>)> {
    let record = state
        .directory
        .send_message(ctx.user_id(), &req.chat_id, &req.content)
        .await?;
    debug!("Message {} stored in {}", record.id, record.conversation_id);

    Ok((
        StatusCode::CREATED,
        Json(message_view(&state.auth, &record).await?),
    ))
}

/// GET /message/{chat_id}
pub async fn list_messages(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<MessageView>>> {
    let records = state
        .directory
        .list_messages(ctx.user_id(), &chat_id)
        .await?;
    let populator = Populator::for_messages(&state.auth, &records).await?;
    Ok(Json(records.iter().map(|m| populator.message(m)).collect()))
}
