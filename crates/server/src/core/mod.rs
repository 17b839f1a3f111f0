//! Core Service Layer
//!
//! Shared infrastructure for the chat server: authentication,
//! configuration, request context and the error type.

pub mod auth;
pub mod config;
pub mod ctx;
pub mod error;
pub mod router;

pub use config::{AppState, ServerConfig};
pub use ctx::Ctx;
pub use error::{Error, Result};
