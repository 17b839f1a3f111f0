//! Live channel client
//!
//! Outbound events go through an unbounded queue drained by a writer task,
//! so [`LiveSink::send`] never blocks the caller. Inbound frames are read
//! on demand with [`LiveClient::next_event`].

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use parley_common::{ClientEvent, ServerEvent};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Anything that can carry client events to the server
pub trait LiveSink {
    fn send(&self, event: ClientEvent) -> Result<()>;
}

/// Cloneable handle onto a connection's outbound queue
#[derive(Clone)]
pub struct LiveSender {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl LiveSink for LiveSender {
    fn send(&self, event: ClientEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| ClientError::Closed)
    }
}

impl LiveSink for mpsc::UnboundedSender<ClientEvent> {
    fn send(&self, event: ClientEvent) -> Result<()> {
        mpsc::UnboundedSender::send(self, event).map_err(|_| ClientError::Closed)
    }
}

pub struct LiveClient {
    sender: LiveSender,
    stream: SplitStream<WsStream>,
    writer: JoinHandle<()>,
}

impl LiveClient {
    /// Open `/live`, authenticating with `token` when given.
    pub async fn connect(config: &ClientConfig, token: Option<&str>) -> Result<Self> {
        let url = match token {
            Some(token) => format!("{}?token={}", config.ws_url(), token),
            None => config.ws_url(),
        };
        let (ws, _) = connect_async(url).await?;
        debug!("Live channel connected");

        let (mut sink, stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientEvent>();

        let writer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {}: {}", event.kind(), e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        Ok(Self {
            sender: LiveSender { tx },
            stream,
            writer,
        })
    }

    pub fn sender(&self) -> LiveSender {
        self.sender.clone()
    }

    pub fn send(&self, event: ClientEvent) -> Result<()> {
        self.sender.send(event)
    }

    /// Next server event; `None` once the channel is closed.
    /// Frames that are not valid events are skipped.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                    Ok(event) => return Some(event),
                    Err(e) => warn!("Skipping unrecognised live frame: {}", e),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => {
                    debug!("Live channel read error: {}", e);
                    return None;
                }
            }
        }
        None
    }

    /// Stop the writer, which closes the socket.
    pub fn close(self) {
        self.writer.abort();
    }
}
