//! Server bootstrap — the composition root.
//!
//! This module is the only place where infrastructure is wired together:
//! the bundle store, the slot index, the deploy registry, the optional
//! default agent, and the axum server itself.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use chorus_core::PlatformConfig;
use chorus_registry::{AgentWorker, BundleStore, DeployRegistry, SlotIndex};

use crate::routes::build_router;
use crate::state::{AppState, ServerContext};

/// A running server: its bound address and the serve future's handle.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub task: tokio::task::JoinHandle<std::io::Result<()>>,
}

/// Build the application context: registry storage, slot reconciliation,
/// and (optionally) the single-agent-mode default worker.
pub async fn build_context(
    config: PlatformConfig,
    default_worker_source: Option<String>,
) -> Result<AppState> {
    let store = BundleStore::new(&config.bundle_dir);
    let index = SlotIndex::open(&config.db_path)
        .await
        .context("opening deploy slot index")?;
    let registry = Arc::new(DeployRegistry::new(store, index));
    registry
        .load_slots()
        .await
        .context("loading deploy slots")?;

    let default_agent = match default_worker_source {
        Some(source) => {
            let definition = chorus_sandbox::load_agent("default", &source)
                .await
                .context("loading default agent worker")?;
            info!(agent = %definition.slug, tools = definition.tools.len(), "default agent loaded");
            Some(Arc::new(AgentWorker {
                definition: Arc::new(definition),
                env: config.platform_secrets(),
            }))
        }
        None => None,
    };

    Ok(Arc::new(ServerContext {
        config,
        registry,
        default_agent,
    }))
}

/// Bind and serve. Returns once the listener is bound; the accept loop
/// runs on the returned task until ctrl-c.
pub async fn serve(state: AppState) -> Result<ServerHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], state.config.port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let addr = listener.local_addr()?;
    info!(%addr, "chorus listening");

    let registry = Arc::clone(&state.registry);
    let app = build_router(state);
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await;
        registry.shutdown().await;
        result
    });

    Ok(ServerHandle { addr, task })
}
