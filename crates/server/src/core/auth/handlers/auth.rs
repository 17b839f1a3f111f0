//! Auth handlers

use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use axum::{extract::State, http::StatusCode, Json};
use parley_common::UserInfo;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

/// POST /user/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    info!("POST /user/signup - {}", req.email);

    let (user, session) = state
        .auth
        .signup(&req.name, &req.email, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token: session.token,
            user,
        }),
    ))
}

/// POST /user/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    info!("POST /user/login - {}", req.email);

    let (user, session) = state.auth.login(&req.email, &req.password).await?;

    Ok(Json(AuthResponse {
        token: session.token,
        user,
    }))
}

/// POST /user/logout
pub async fn logout(State(state): State<AppState>, ctx: Ctx) -> Result<StatusCode> {
    info!("POST /user/logout - {}", ctx.user_id());
    state.auth.logout(ctx.token()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /user/me
pub async fn me(State(state): State<AppState>, ctx: Ctx) -> Result<Json<UserInfo>> {
    let user = state
        .auth
        .get_user(ctx.user_id())
        .await?
        .ok_or_else(|| crate::core::error::Error::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}
