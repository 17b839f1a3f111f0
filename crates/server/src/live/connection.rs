use std::fmt;
use uuid::Uuid;

/// Identifier of one live transport session, fresh per handshake.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::new_v4()))
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
