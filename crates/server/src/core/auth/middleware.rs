use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::{Error, Result};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// Pull `<token>` out of `Authorization: Bearer <token>`.
///
/// `Ok(None)` when the header is absent; a present but malformed header is an error.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| Error::Unauthorized("Malformed authorization header".to_string()))?;

    // Format: "Bearer <token>"
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
        _ => Err(Error::Unauthorized(
            "Malformed authorization header".to_string(),
        )),
    }
}

pub async fn mw_require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    debug!("MIDDLEWARE: require_auth");

    let token = bearer_token(req.headers())?
        .ok_or_else(|| Error::Unauthorized("Missing bearer token".to_string()))?;

    let user = state.auth.validate_session(&token).await?;

    req.extensions_mut().insert(Ctx::new(user.id, token));

    Ok(next.run(req).await)
}
