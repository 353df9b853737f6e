//! Browser↔server wire protocol.
//!
//! Frames are either UTF-8 JSON control messages or binary PCM16 LE audio.
//! Control messages are closed discriminated unions on a `type` field;
//! unknown tags deserialize into the `Unknown` catch-all so the driver can
//! drop them without erroring. Binary frames never reach these types — the
//! transport layers hand them straight to the audio path.

use serde::{Deserialize, Serialize};

/// Control frames sent server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Negotiated audio parameters; the client starts audio I/O on receipt.
    Ready {
        sample_rate: u32,
        tts_sample_rate: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u32>,
    },

    /// Assistant greeting, spoken at session start.
    Greeting { text: String },

    /// Partial or final user transcript.
    Transcript {
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
    },

    /// A completed user turn.
    Turn { text: String },

    /// LLM call started.
    Thinking,

    /// Final assistant reply for the turn, with tool-use step labels.
    Chat { text: String, steps: Vec<String> },

    /// The TTS stream for the current turn finished naturally.
    TtsDone,

    /// Acknowledgement of a client cancel.
    Cancelled,

    /// Acknowledgement of a client reset.
    Reset,

    /// Terminal or recoverable error.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Vec<String>>,
    },

    /// Heartbeat reply.
    Pong,

    /// Any tag this build does not know. Dropped on receipt, never sent.
    #[serde(other)]
    Unknown,
}

/// Control frames sent client → server.
///
/// All other client→server traffic is binary microphone PCM16 LE at the
/// negotiated sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Client audio pipelines are up; the session may start listening.
    AudioReady,

    /// Barge-in: stop speaking, drop in-flight work, keep the transcript.
    Cancel,

    /// Truncate the transcript to the system message.
    Reset,

    /// Heartbeat.
    Ping,

    /// Any tag this build does not know. Dropped on receipt, never sent.
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Parse a JSON text frame. Malformed JSON is `None` (dropped).
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

impl ClientFrame {
    /// Parse a JSON text frame. Malformed JSON is `None` (dropped).
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
