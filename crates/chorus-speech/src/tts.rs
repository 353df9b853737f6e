//! Streaming text-to-speech over the AssemblyAI TTS WebSocket.
//!
//! One vendor connection per utterance: `synthesize` connects, sends the
//! speak request, forwards binary PCM frames into `on_audio` until the
//! vendor signals completion, and tears the connection down. Calls on one
//! adapter instance are serialized by an internal async mutex, so a prior
//! call always observes its cancel token (and releases the lock) before the
//! next utterance starts streaming — this is what keeps turn N+1 audio from
//! ever interleaving with turn N.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chorus_core::ports::{TtsError, TtsSynthesizer};

/// Default vendor endpoint.
const DEFAULT_WSS_URL: &str = "wss://streaming.assemblyai.com/v3/tts/ws";

/// TTS adapter configuration.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    /// Voice identifier from the agent definition.
    pub voice: String,
    /// PCM output rate (Hz), advertised to clients in `ready`.
    pub sample_rate: u32,
    /// Endpoint override (`ASSEMBLYAI_TTS_WSS_URL`).
    pub wss_url: Option<String>,
}

/// Speak request sent after connect.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum VendorMessage {
    Speak {
        text: String,
        voice: String,
        sample_rate: u32,
    },
}

/// Vendor control frames between the binary PCM frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum VendorEvent {
    /// Synthesis complete; no more audio follows.
    Done,
    Error {
        #[serde(default)]
        error: String,
    },
    #[serde(other)]
    Other,
}

/// [`TtsSynthesizer`] for the AssemblyAI streaming TTS API.
pub struct AssemblyAiTts {
    config: TtsConfig,
    /// Serializes utterances on this instance.
    turn_lock: Mutex<()>,
}

impl AssemblyAiTts {
    #[must_use]
    pub fn new(config: TtsConfig) -> Self {
        Self {
            config,
            turn_lock: Mutex::new(()),
        }
    }

    fn endpoint(&self) -> String {
        self.config
            .wss_url
            .as_deref()
            .unwrap_or(DEFAULT_WSS_URL)
            .trim_end_matches('/')
            .to_string()
    }
}

#[async_trait]
impl TtsSynthesizer for AssemblyAiTts {
    async fn synthesize(
        &self,
        text: &str,
        on_audio: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<(), TtsError> {
        let _utterance = self.turn_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(TtsError::Cancelled);
        }
        if text.trim().is_empty() {
            return Ok(());
        }

        let mut request = self
            .endpoint()
            .into_client_request()
            .map_err(|e| TtsError::Connect(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            self.config
                .api_key
                .parse()
                .map_err(|_| TtsError::Connect("API key is not a valid header value".into()))?,
        );

        let connect = tokio::select! {
            result = connect_async(request) => result,
            () = cancel.cancelled() => return Err(TtsError::Cancelled),
        };
        let (mut stream, _) = connect.map_err(|e| TtsError::Connect(e.to_string()))?;

        let speak = VendorMessage::Speak {
            text: text.to_string(),
            voice: self.config.voice.clone(),
            sample_rate: self.config.sample_rate,
        };
        let speak_json =
            serde_json::to_string(&speak).map_err(|e| TtsError::Stream(e.to_string()))?;
        stream
            .send(Message::text(speak_json))
            .await
            .map_err(|e| TtsError::Stream(e.to_string()))?;

        debug!(chars = text.len(), voice = %self.config.voice, "TTS synthesis started");

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                () = cancel.cancelled() => {
                    let _ = stream.close(None).await;
                    return Err(TtsError::Cancelled);
                }
            };
            match next {
                Some(Ok(Message::Binary(pcm))) => {
                    if on_audio.send(Bytes::from(pcm)).await.is_err() {
                        // Session dropped the audio path — treat as cancel.
                        let _ = stream.close(None).await;
                        return Err(TtsError::Cancelled);
                    }
                }
                Some(Ok(Message::Text(frame))) => {
                    match serde_json::from_str::<VendorEvent>(&frame) {
                        Ok(VendorEvent::Done) => break,
                        Ok(VendorEvent::Error { error }) => {
                            warn!(error = %error, "TTS vendor error");
                            return Err(TtsError::Stream(error));
                        }
                        Ok(VendorEvent::Other) | Err(_) => {
                            debug!(frame = %frame, "unparseable TTS vendor frame, ignoring");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TtsError::Stream(e.to_string())),
            }
        }

        let _ = stream.close(None).await;
        debug!("TTS synthesis finished");
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(url: Option<&str>) -> AssemblyAiTts {
        AssemblyAiTts::new(TtsConfig {
            api_key: "k".to_string(),
            voice: "luna".to_string(),
            sample_rate: 24_000,
            wss_url: url.map(ToString::to_string),
        })
    }

    #[test]
    fn endpoint_defaults_and_overrides() {
        assert_eq!(
            adapter(None).endpoint(),
            "wss://streaming.assemblyai.com/v3/tts/ws"
        );
        assert_eq!(
            adapter(Some("ws://localhost:9999/")).endpoint(),
            "ws://localhost:9999"
        );
    }

    #[test]
    fn speak_message_shape() {
        let speak = VendorMessage::Speak {
            text: "hello".to_string(),
            voice: "luna".to_string(),
            sample_rate: 24_000,
        };
        let json = serde_json::to_value(&speak).unwrap();
        assert_eq!(json["type"], "Speak");
        assert_eq!(json["voice"], "luna");
        assert_eq!(json["sample_rate"], 24_000);
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let tts = adapter(Some("ws://127.0.0.1:9"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(1);
        let err = tts.synthesize("hello", tx, cancel).await.unwrap_err();
        assert!(matches!(err, TtsError::Cancelled));
    }

    #[tokio::test]
    async fn empty_text_is_a_no_op() {
        let tts = adapter(Some("ws://127.0.0.1:9"));
        let (tx, _rx) = mpsc::channel(1);
        assert!(
            tts.synthesize("   ", tx, CancellationToken::new())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn connect_failure_maps_to_connect_error() {
        let tts = adapter(Some("ws://127.0.0.1:9"));
        let (tx, _rx) = mpsc::channel(1);
        let err = tts
            .synthesize("hello", tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::Connect(_)));
    }
}
