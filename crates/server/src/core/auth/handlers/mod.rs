//! Auth Handlers

pub mod auth;
pub mod users;

pub use auth::{login, logout, me, signup};
pub use users::{list_users, search_users};
