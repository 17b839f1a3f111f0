//! Parley Chat Server Library
//!
//! Accounts, the conversation directory and real-time fan-out over one
//! axum router.

pub mod core;
pub mod directory;
pub mod live;

use axum::{middleware, routing::get, Router};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::auth::middleware::mw_require_auth;
use crate::core::{AppState, ServerConfig};

/// Build the full HTTP + WebSocket router around `state`
pub fn app(state: AppState) -> Router {
    let protected = core::router::protected()
        .merge(directory::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            mw_require_auth,
        ));

    Router::new()
        .merge(core::router::public())
        .merge(protected)
        .route("/live", get(live::socket::live_handler))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK"
}

/// Install the global subscriber; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env();
    info!("=== Parley Server ===");
    info!("Data directory: {:?}", config.data_dir);
    info!("Persistence: {}", if config.persist { "on" } else { "off" });

    let addr = config.bind_addr;
    let state = AppState::open(config).await?;

    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state).await
}

/// Serve the app on an already-bound listener until it fails
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}
