//! Domain types, wire protocol, and port traits for chorus.
//!
//! This crate is the dependency root of the workspace: every other crate
//! depends on it, and it depends on no other workspace crate. Adapter crates
//! (`chorus-speech`, `chorus-llm`, `chorus-sandbox`) implement the port
//! traits defined here; `chorus-session` consumes them without knowing which
//! vendor sits behind the seam.

pub mod agent;
pub mod chat;
pub mod config;
pub mod ports;
pub mod reconnect;
pub mod state;
pub mod text;
pub mod wire;

pub use agent::{AgentDefinition, ToolDefinition, ToolSpec};
pub use chat::{ChatMessage, ToolCall};
pub use config::{ConfigError, PlatformConfig};
pub use ports::{
    AssistantReply, ChatCompleter, LlmError, SttConnector, SttError, SttEvent, SttHandle,
    ToolExecutor, TtsError, TtsSynthesizer,
};
pub use reconnect::ReconnectPolicy;
pub use state::SessionState;
pub use wire::{ClientFrame, ServerFrame};
