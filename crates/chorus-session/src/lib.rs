//! Per-connection session orchestrator.
//!
//! One [`SessionDriver`] task drives one client WebSocket through its
//! lifetime: it owns the state machine, the transcript, cancellation of
//! in-flight work, and the fan-in from STT, the LLM, and TTS.
//!
//! ```text
//!   client ──binary PCM──▶ driver ──▶ STT ──onTurn──▶ turn task
//!                            │                          │ LLM ⇄ tools
//!   client ◀─frames/audio── outbound ◀──────────────────┘ TTS
//! ```
//!
//! The driver never blocks on audio: microphone frames forward to the STT
//! handle with a non-blocking send, dropping rather than stalling. Each
//! user turn runs as one spawned task carrying a cancel token; starting a
//! new turn (or a client cancel/reset) cancels the previous task *and
//! awaits it* before proceeding, which is what makes the per-turn frame
//! ordering — `turn, thinking, (chat), audio*, tts_done` — a structural
//! guarantee rather than a timing accident.

mod driver;
mod shared;
mod turn;

pub use driver::{ClientInput, Outbound, SessionDeps, SessionDriver};
pub use shared::SessionShared;
pub use turn::{FALLBACK_REPLY, LOOP_EXHAUSTED_REPLY, MAX_TOOL_ITERATIONS};
