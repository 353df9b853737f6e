//! Transport seam: the WebSocket behind a trait.
//!
//! The session state machine only sees [`WireIn`]/[`WireOut`]; production
//! uses [`TungsteniteConnector`], tests inject scripted connectors to
//! exercise reconnect/heartbeat behavior without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use chorus_core::{ClientFrame, ServerFrame};

use crate::error::ClientError;

/// Traffic arriving from the server.
#[derive(Debug)]
pub enum WireIn {
    Frame(ServerFrame),
    /// Binary PCM16 LE TTS audio.
    Audio(Bytes),
}

/// Traffic sent to the server.
#[derive(Debug)]
pub enum WireOut {
    Frame(ClientFrame),
    /// Binary PCM16 LE microphone audio.
    Audio(Bytes),
}

/// One live connection.
#[async_trait]
pub trait Transport: Send {
    /// Next inbound item; `None` once the connection is closed.
    async fn next(&mut self) -> Option<WireIn>;

    /// Send one outbound item. An error means the connection is dead.
    async fn send(&mut self, out: WireOut) -> Result<(), ClientError>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError>;
}

// ── tokio-tungstenite production implementation ────────────────────

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl Transport for WsTransport {
    async fn next(&mut self) -> Option<WireIn> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match ServerFrame::parse(&text) {
                    Some(frame) => return Some(WireIn::Frame(frame)),
                    None => {
                        debug!("malformed server frame dropped");
                        continue;
                    }
                },
                Ok(Message::Binary(pcm)) => return Some(WireIn::Audio(Bytes::from(pcm))),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    async fn send(&mut self, out: WireOut) -> Result<(), ClientError> {
        let message = match out {
            WireOut::Frame(frame) => Message::Text(
                serde_json::to_string(&frame)
                    .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?,
            ),
            WireOut::Audio(pcm) => Message::Binary(pcm.to_vec()),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
