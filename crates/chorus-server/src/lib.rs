//! Axum web adapter.
//!
//! Routes, WebSocket session plumbing, and the composition root that wires
//! the vendor adapters, sandbox, registry, and session driver together.
//! No domain logic lives here — handlers translate transport to and from
//! the crates that own the behavior.

mod bootstrap;
mod handlers;
mod routes;
mod state;

pub use bootstrap::{ServerHandle, build_context, serve};
pub use routes::build_router;
pub use state::{AppState, ServerContext};
