//! Core Router
//!
//! Account routes. `public` needs no session; `protected` sits behind
//! `mw_require_auth`.

use crate::core::auth::handlers as auth_handlers;
use crate::core::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn public() -> Router<AppState> {
    Router::new()
        .route("/user/signup", post(auth_handlers::signup))
        .route("/user/login", post(auth_handlers::login))
}

pub fn protected() -> Router<AppState> {
    Router::new()
        .route("/user/logout", post(auth_handlers::logout))
        .route("/user/me", get(auth_handlers::me))
        .route("/user/all", get(auth_handlers::list_users))
        .route("/user/search", get(auth_handlers::search_users))
}
