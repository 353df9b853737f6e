//! Speech vendor adapters — streaming STT and TTS over WebSocket.
//!
//! Both adapters keep the vendor protocol entirely behind the port traits
//! in `chorus-core`: the orchestrator sees transcripts, turns, and PCM
//! frames, never vendor message shapes. Each session gets its own STT
//! stream; TTS connections are per-utterance and serialized per adapter
//! instance so a cancelled synthesis can never interleave audio with its
//! successor.

pub mod stt;
pub mod tts;

pub use stt::{AssemblyAiStt, SttConfig};
pub use tts::{AssemblyAiTts, TtsConfig};
