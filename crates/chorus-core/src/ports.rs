//! Port traits at the vendor seams.
//!
//! The session orchestrator only ever sees these traits; the concrete
//! vendor adapters live in `chorus-speech`, `chorus-llm`, and
//! `chorus-sandbox`. Tests drive the orchestrator with channel-backed
//! fakes implementing the same traits.
//!
//! Cancellation is cooperative everywhere: each call that can outlive a
//! barge-in takes a [`CancellationToken`] and must abort its underlying
//! network work when the token fires.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatMessage, ToolCall};
use crate::agent::ToolSpec;

// ── STT ────────────────────────────────────────────────────────────

/// Events emitted by a live STT stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SttEvent {
    /// Partial or formatted-final transcript of in-progress speech.
    Transcript { text: String, is_final: bool },
    /// A completed user turn — triggers one chat+TTS cycle.
    Turn { text: String },
    /// Vendor-side error. The stream may still be usable.
    Error(String),
    /// The vendor closed the stream.
    Closed,
}

/// Handle to a live STT stream.
///
/// All methods are non-blocking: audio forwarding must never stall the
/// session driver, so `send_audio` drops the frame rather than block when
/// the adapter's buffer is full.
pub trait SttHandle: Send + Sync {
    /// Forward one binary PCM16 LE frame, in arrival order.
    fn send_audio(&self, pcm: Bytes);

    /// Drop vendor-side buffered audio (barge-in).
    fn clear(&self);

    /// Close the stream. Idempotent.
    fn close(&self);
}

/// Connects STT streams. One connect per session.
#[async_trait]
pub trait SttConnector: Send + Sync {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn SttHandle>, mpsc::Receiver<SttEvent>), SttError>;
}

/// STT adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("Failed to connect to speech recognition: {0}")]
    Connect(String),

    #[error("Speech recognition stream failed: {0}")]
    Stream(String),
}

// ── TTS ────────────────────────────────────────────────────────────

/// Streaming text-to-speech.
///
/// `synthesize` streams PCM16 LE frames at the adapter's advertised sample
/// rate into `on_audio` until the text completes or `cancel` fires.
/// Implementations serialize concurrent calls on one instance: a prior call
/// must be cancellable before the next begins.
#[async_trait]
pub trait TtsSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        on_audio: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<(), TtsError>;

    /// Output sample rate in Hz, advertised to clients in `ready`.
    fn sample_rate(&self) -> u32;
}

/// TTS adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("TTS connection failed: {0}")]
    Connect(String),

    #[error("TTS synthesis failed: {0}")]
    Stream(String),

    #[error("TTS synthesis cancelled")]
    Cancelled,
}

// ── LLM ────────────────────────────────────────────────────────────

/// One assistant reply: either final text, or a batch of parallel tool
/// calls (with optional accompanying content). Never both empty — an empty
/// reply is normalized downstream to the canned fallback text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantReply {
    /// Whether this reply requests tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Chat completion with tool schemas.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        cancel: &CancellationToken,
    ) -> Result<AssistantReply, LlmError>;
}

/// LLM adapter errors. `Cancelled` is distinguished because a cancelled
/// turn is not a failure — the session stays out of the error state.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Chat failed: {0}")]
    Request(String),

    #[error("Chat failed: malformed completion: {0}")]
    Malformed(String),

    #[error("chat cancelled")]
    Cancelled,
}

// ── Tools ──────────────────────────────────────────────────────────

/// Executes agent tools. Failures are *values*: handler exceptions,
/// timeouts, and unknown names all come back as result strings the LLM can
/// read, never as `Err`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run tool `name` with parsed JSON arguments.
    async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> String;

    /// Release the underlying isolate. Idempotent.
    fn dispose(&self);
}
