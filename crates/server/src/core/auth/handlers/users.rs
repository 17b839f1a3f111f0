use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use axum::{
    extract::{Query, State},
    Json,
};
use parley_common::UserInfo;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

/// GET /user/all
pub async fn list_users(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Vec<UserInfo>>> {
    Ok(Json(state.auth.list_users_except(ctx.user_id()).await?))
}

/// GET /user/search?query=
pub async fn search_users(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<UserInfo>>> {
    Ok(Json(
        state.auth.search_users(ctx.user_id(), &params.query).await?,
    ))
}
