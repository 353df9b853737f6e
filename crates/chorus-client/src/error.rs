//! Client-side error kinds.

/// Errors surfaced to the application through the event bus.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Microphone permission refused or device missing.
    #[error("Microphone unavailable or permission denied")]
    MicDenied,

    /// Audio pipeline initialization failed.
    #[error("Audio setup failed: {0}")]
    AudioSetupFailed(String),

    /// WebSocket handshake or early transport error.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Reconnect attempts exhausted.
    #[error("Reconnect attempts exhausted")]
    MaxReconnects,

    /// An `error` frame received from the server.
    #[error("{message}")]
    Server {
        message: String,
        details: Option<Vec<String>>,
    },
}
