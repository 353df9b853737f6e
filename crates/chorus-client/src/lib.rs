//! Native client session for chorus.
//!
//! The counterpart of the server's session orchestrator: owns microphone
//! capture, speaker playback, the connection state machine, reconnection
//! backoff, and the heartbeat. Applications observe it through a typed
//! event registry and drive it with `cancel()` / `reset()` /
//! `disconnect()`.
//!
//! The WebSocket sits behind the [`Connector`] seam and the audio devices
//! behind [`MicSource`] / [`SpeakerSink`], so the full state machine —
//! backoff schedules, heartbeat timeouts, the cancel flag that drops late
//! TTS audio — is exercised in tests with scripted fakes and paused time.

mod audio;
mod capture;
mod error;
mod events;
mod playback;
mod session;
mod transport;

pub use audio::{MicSource, SpeakerSink};
pub use capture::CpalMicSource;
pub use error::ClientError;
pub use events::{ClientEvent, EventBus, EventKind, Subscription};
pub use playback::RodioSpeakerSink;
pub use session::{ClientSession, SessionOptions};
pub use transport::{Connector, Transport, TungsteniteConnector, WireIn, WireOut};
