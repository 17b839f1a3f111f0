use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::{Error, Result};
use crate::directory::views::{conversation_view, Populator};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use parley_common::ConversationView;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDirectRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub users: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub chat_id: String,
    pub chat_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub chat_id: String,
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub name: Option<String>,
}

async fn ensure_user(state: &AppState, user_id: &str) -> Result<()> {
    if !state.auth.user_exists(user_id.trim()).await? {
        return Err(Error::NotFound(format!("User {} not found", user_id)));
    }
    Ok(())
}

/// POST /chat
pub async fn access_direct(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<AccessDirectRequest>,
) -> Result<Json<ConversationView>> {
    if req.user_id.trim().is_empty() {
        return Err(Error::Validation("userId is required".to_string()));
    }
    ensure_user(&state, &req.user_id).await?;

    let entry = state
        .directory
        .access_direct(ctx.user_id(), &req.user_id)
        .await?;
    Ok(Json(conversation_view(&state.auth, entry).await?))
}

/// GET /chat
pub async fn list_conversations(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<Vec<ConversationView>>> {
    let entries = state.directory.list_for(ctx.user_id()).await;
    let populator = Populator::for_entries(&state.auth, &entries).await?;
    Ok(Json(
        entries.iter().map(|e| populator.conversation(e)).collect(),
    ))
}

/// POST /chat/group
pub async fn create_group(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ConversationView>)> {
    info!("POST /chat/group - {} by {}", req.name, ctx.user_id());
    for user in req.users.iter().filter(|u| u.as_str() != ctx.user_id()) {
        ensure_user(&state, user).await?;
    }

    let entry = state
        .directory
        .create_group(ctx.user_id(), &req.name, &req.users)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(conversation_view(&state.auth, entry).await?),
    ))
}

/// PUT /chat/rename
pub async fn rename_group(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<RenameRequest>,
) -> Result<Json<ConversationView>> {
    let entry = state
        .directory
        .rename_group(ctx.user_id(), &req.chat_id, &req.chat_name)
        .await?;
    Ok(Json(conversation_view(&state.auth, entry).await?))
}

/// PUT /chat/groupadd
pub async fn add_member(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<MemberRequest>,
) -> Result<Json<ConversationView>> {
    // unknown user ids are only reported to the admin
    state.directory.check_admin(ctx.user_id(), &req.chat_id).await?;
    ensure_user(&state, &req.user_id).await?;
    let entry = state
        .directory
        .add_member(ctx.user_id(), &req.chat_id, &req.user_id)
        .await?;
    Ok(Json(conversation_view(&state.auth, entry).await?))
}

/// PUT /chat/groupremove
pub async fn remove_member(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<MemberRequest>,
) -> Result<Json<ConversationView>> {
    let entry = state
        .directory
        .remove_member(ctx.user_id(), &req.chat_id, &req.user_id)
        .await?;
    Ok(Json(conversation_view(&state.auth, entry).await?))
}

/// GET /chat/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>> {
    let entry = state.directory.get(ctx.user_id(), &id).await?;
    Ok(Json(conversation_view(&state.auth, entry).await?))
}

/// PUT /chat/{id}
pub async fn update_conversation(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ConversationView>> {
    let entry = state
        .directory
        .update(ctx.user_id(), &id, req.name.as_deref())
        .await?;
    Ok(Json(conversation_view(&state.auth, entry).await?))
}

/// DELETE /chat/{id}
pub async fn delete_conversation(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    info!("DELETE /chat/{} by {}", id, ctx.user_id());
    state.directory.delete(ctx.user_id(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
