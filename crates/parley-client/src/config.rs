use std::time::Duration;

/// Where the client talks to
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `http(s)://host:port` of the server, no trailing path
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Live channel endpoint derived from `base_url`
    pub fn ws_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/live", base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url() {
        assert_eq!(
            ClientConfig::new("http://localhost:5000/").ws_url(),
            "ws://localhost:5000/live"
        );
        assert_eq!(
            ClientConfig::new("https://chat.example.com").ws_url(),
            "wss://chat.example.com/live"
        );
        assert_eq!(
            ClientConfig::new("http://h:1").url("/chat"),
            "http://h:1/chat"
        );
    }
}
