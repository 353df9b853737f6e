//! Streaming speech-to-text over the AssemblyAI realtime WebSocket.
//!
//! One connection per session. Binary PCM16 LE frames go up; JSON turn
//! events come down. Two tasks per stream:
//!
//! * **writer** — drains the command channel (audio frames, buffer clear,
//!   terminate) into the WebSocket sink. The command channel is bounded and
//!   fed with `try_send`: when the vendor cannot keep up, frames are
//!   dropped rather than stalling the session driver.
//! * **reader** — parses vendor events into [`SttEvent`]s for the session.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, info, warn};

use chorus_core::ports::{SttConnector, SttError, SttEvent, SttHandle};

/// Default vendor endpoint.
const DEFAULT_WSS_URL: &str = "wss://streaming.assemblyai.com/v3/ws";

/// Audio command buffer: ~25 s of 100 ms frames before frames drop.
const COMMAND_BUFFER: usize = 256;

/// STT adapter configuration.
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub api_key: String,
    /// Microphone sample rate the vendor should expect (Hz).
    pub sample_rate: u32,
    /// Endpoint override, primarily for tests.
    pub wss_url: Option<String>,
}

/// Commands accepted by the writer task.
enum Command {
    Audio(Bytes),
    Clear,
    Close,
}

/// Messages sent to the vendor besides raw audio.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum VendorMessage {
    /// Drop vendor-side buffered audio (barge-in).
    ClearBuffer,
    /// Graceful end of stream.
    Terminate,
}

/// Vendor events we consume. Everything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum VendorEvent {
    /// Session opened.
    Begin {
        #[serde(default)]
        id: String,
    },
    /// Running transcript for the current turn.
    Turn {
        #[serde(default)]
        transcript: String,
        #[serde(default)]
        end_of_turn: bool,
        #[serde(default)]
        turn_is_formatted: bool,
    },
    /// Vendor-side failure.
    Error {
        #[serde(default)]
        error: String,
    },
    /// Stream closing.
    Termination {},
    #[serde(other)]
    Other,
}

/// [`SttConnector`] for the AssemblyAI realtime API.
pub struct AssemblyAiStt {
    config: SttConfig,
}

impl AssemblyAiStt {
    #[must_use]
    pub const fn new(config: SttConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .wss_url
            .as_deref()
            .unwrap_or(DEFAULT_WSS_URL)
            .trim_end_matches('/');
        format!("{base}?sample_rate={}", self.config.sample_rate)
    }
}

#[async_trait]
impl SttConnector for AssemblyAiStt {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn SttHandle>, mpsc::Receiver<SttEvent>), SttError> {
        let url = self.endpoint();
        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| SttError::Connect(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            self.config
                .api_key
                .parse()
                .map_err(|_| SttError::Connect("API key is not a valid header value".into()))?,
        );

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| SttError::Connect(e.to_string()))?;
        info!(url = %url, "STT stream connected");

        let (ws_sink, ws_source) = stream.split();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(64);

        tokio::spawn(write_loop(ws_sink, command_rx));
        tokio::spawn(read_loop(ws_source, event_tx));

        Ok((Box::new(Handle { command_tx }), event_rx))
    }
}

/// Live stream handle. All methods are non-blocking.
struct Handle {
    command_tx: mpsc::Sender<Command>,
}

impl SttHandle for Handle {
    fn send_audio(&self, pcm: Bytes) {
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.command_tx.try_send(Command::Audio(pcm))
        {
            // Dropping beats stalling the session's audio fan-in.
            warn!("STT command buffer full — dropping audio frame");
        }
    }

    fn clear(&self) {
        let _ = self.command_tx.try_send(Command::Clear);
    }

    fn close(&self) {
        let _ = self.command_tx.try_send(Command::Close);
    }
}

async fn write_loop(
    mut sink: impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
    mut commands: mpsc::Receiver<Command>,
) {
    while let Some(command) = commands.recv().await {
        let message = match command {
            Command::Audio(pcm) => Message::Binary(pcm.to_vec()),
            Command::Clear => match vendor_json(&VendorMessage::ClearBuffer) {
                Some(m) => m,
                None => continue,
            },
            Command::Close => {
                if let Some(m) = vendor_json(&VendorMessage::Terminate) {
                    let _ = sink.send(m).await;
                }
                let _ = sink.close().await;
                break;
            }
        };
        if sink.send(message).await.is_err() {
            // Vendor hung up; the reader surfaces the close to the session.
            break;
        }
    }
}

fn vendor_json(message: &VendorMessage) -> Option<Message> {
    serde_json::to_string(message).ok().map(Message::text)
}

async fn read_loop(
    mut source: impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
    events: mpsc::Sender<SttEvent>,
) {
    while let Some(next) = source.next().await {
        match next {
            Ok(Message::Text(text)) => {
                let Ok(event) = serde_json::from_str::<VendorEvent>(&text) else {
                    debug!(frame = %text, "unparseable STT vendor frame, ignoring");
                    continue;
                };
                match event {
                    VendorEvent::Begin { id } => {
                        debug!(vendor_session = %id, "STT vendor session began");
                    }
                    VendorEvent::Turn {
                        transcript,
                        end_of_turn,
                        turn_is_formatted,
                    } => {
                        if transcript.is_empty() {
                            continue;
                        }
                        if end_of_turn {
                            // The formatted final arrives after the raw one;
                            // forward both as transcripts but only the
                            // formatted (or only) final as the turn.
                            let _ = events
                                .send(SttEvent::Transcript {
                                    text: transcript.clone(),
                                    is_final: true,
                                })
                                .await;
                            if turn_is_formatted {
                                let _ = events.send(SttEvent::Turn { text: transcript }).await;
                            }
                        } else {
                            let _ = events
                                .send(SttEvent::Transcript {
                                    text: transcript,
                                    is_final: false,
                                })
                                .await;
                        }
                    }
                    VendorEvent::Error { error } => {
                        warn!(error = %error, "STT vendor error");
                        let _ = events.send(SttEvent::Error(error)).await;
                    }
                    VendorEvent::Termination {} => break,
                    VendorEvent::Other => {}
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                let _ = events.send(SttEvent::Error(e.to_string())).await;
                break;
            }
        }
    }
    let _ = events.send(SttEvent::Closed).await;
    debug!("STT read loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_sample_rate() {
        let stt = AssemblyAiStt::new(SttConfig {
            api_key: "k".to_string(),
            sample_rate: 16_000,
            wss_url: None,
        });
        assert_eq!(
            stt.endpoint(),
            "wss://streaming.assemblyai.com/v3/ws?sample_rate=16000"
        );
    }

    #[test]
    fn endpoint_override_is_respected() {
        let stt = AssemblyAiStt::new(SttConfig {
            api_key: "k".to_string(),
            sample_rate: 8_000,
            wss_url: Some("ws://127.0.0.1:9/".to_string()),
        });
        assert_eq!(stt.endpoint(), "ws://127.0.0.1:9?sample_rate=8000");
    }

    #[test]
    fn vendor_messages_serialize_with_type_tags() {
        let clear = serde_json::to_value(VendorMessage::ClearBuffer).unwrap();
        assert_eq!(clear["type"], "ClearBuffer");
        let terminate = serde_json::to_value(VendorMessage::Terminate).unwrap();
        assert_eq!(terminate["type"], "Terminate");
    }

    #[test]
    fn unknown_vendor_events_parse_to_other() {
        let event: VendorEvent =
            serde_json::from_str(r#"{"type":"UsageReport","tokens":9}"#).unwrap();
        assert!(matches!(event, VendorEvent::Other));
    }

    #[tokio::test]
    async fn connect_failure_maps_to_connect_error() {
        let stt = AssemblyAiStt::new(SttConfig {
            api_key: "k".to_string(),
            sample_rate: 16_000,
            // Discard port on loopback: refused immediately.
            wss_url: Some("ws://127.0.0.1:9".to_string()),
        });
        let result = stt.connect().await;
        let Err(err) = result else {
            panic!("expected connect() to fail");
        };
        assert!(matches!(err, SttError::Connect(_)));
    }
}
