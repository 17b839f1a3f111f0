use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response; `message` comes from the server's error body
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid url: {0}")]
    Url(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("live channel closed")]
    Closed,

    #[error("no conversation is open")]
    NoConversationOpen,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(err.to_string())
    }
}

impl ClientError {
    /// HTTP status, when the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
