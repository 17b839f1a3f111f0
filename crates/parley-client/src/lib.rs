//! Parley client library
//!
//! - [`RestClient`]: durable REST surface (accounts, conversations, messages)
//! - [`LiveClient`]: the `/live` WebSocket channel
//! - [`ReconciliationStore`]: merges fetched history with live events
//! - [`ChatSession`]: drives all three for one signed-in user

pub mod api;
pub mod config;
pub mod error;
pub mod live;
pub mod session;
pub mod store;

pub use api::{AuthResponse, RestClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use live::{LiveClient, LiveSender, LiveSink};
pub use session::ChatSession;
pub use store::{
    ConversationSummary, Effect, LiveStatus, LoadState, MessageList, OpenAction,
    ReconciliationStore, Resync,
};
