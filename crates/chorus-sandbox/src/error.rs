//! Sandbox error types.

/// Errors that can occur while building or driving an isolate.
///
/// Handler-level failures (exceptions, timeouts, unknown tools) are *not*
/// errors — they surface as result strings so the LLM loop can react.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The QuickJS runtime or context could not be created.
    #[error("failed to initialize isolate: {0}")]
    Init(String),

    /// JavaScript evaluation raised an exception.
    #[error("{0}")]
    Js(String),

    /// A bundle's worker source did not produce a valid agent definition.
    #[error("failed to load agent from worker source: {0}")]
    AgentLoad(String),

    /// Data crossing the host/isolate boundary could not be serialized.
    #[error("serialization across the isolate boundary failed: {0}")]
    Boundary(#[from] serde_json::Error),
}
