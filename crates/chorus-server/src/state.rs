//! Shared application state type.

use std::sync::Arc;

use chorus_core::PlatformConfig;
use chorus_registry::{AgentWorker, DeployRegistry};

/// Application state shared across all handlers.
pub type AppState = Arc<ServerContext>;

/// Everything handlers need: configuration, the deploy registry, and the
/// optional default agent served on the bare `/session` route.
pub struct ServerContext {
    pub config: PlatformConfig,
    pub registry: Arc<DeployRegistry>,
    /// Single-agent mode: the agent behind `/session`. `None` means only
    /// deployed slugs are routable.
    pub default_agent: Option<Arc<AgentWorker>>,
}
