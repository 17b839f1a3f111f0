//! Real-time chat synchronisation
//!
//! - [`LiveHub`]: presence registry + room membership index + outbound queues
//! - [`EventRouter`]: inbound event -> fan-out
//! - [`socket`]: the `/live` WebSocket driver

pub mod connection;
pub mod hub;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod socket;

pub use connection::ConnectionId;
pub use hub::{Departure, LiveHub};
pub use presence::PresenceRegistry;
pub use rooms::RoomIndex;
pub use router::{EventRouter, Outcome};
