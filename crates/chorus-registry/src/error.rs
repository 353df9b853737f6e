//! Registry error types.

/// Errors from the deploy registry and its storage layers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A deploy upload failed validation (bad slug, missing secrets).
    /// Maps to HTTP 400 at the endpoint.
    #[error("invalid deploy: {0}")]
    InvalidDeploy(String),

    /// No bundle is deployed under the requested slug.
    #[error("unknown slug: {0}")]
    UnknownSlug(String),

    /// The bundle's worker source failed to load as an agent.
    #[error("failed to load agent for slug {slug}: {reason}")]
    WorkerLoad { slug: String, reason: String },

    /// Filesystem failure in the bundle store.
    #[error("bundle store I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Slot index (SQLite) failure.
    #[error("slot index: {0}")]
    Index(String),

    /// Manifest or env payload could not be (de)serialized.
    #[error("manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        Self::Index(e.to_string())
    }
}
