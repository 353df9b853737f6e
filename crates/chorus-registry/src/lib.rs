//! Deploy registry — persistence and routing for agent bundles.
//!
//! A bundle is `{manifest.json, worker.js, client.js}` under one slug
//! directory. Three layers cooperate here:
//!
//! * [`BundleStore`] — the on-disk layout, written atomically per slug
//!   (temp-write-then-rename) so a failed deploy leaves the previous
//!   version live.
//! * [`SlotIndex`] — a SQLite key-value index (`slug → env`) that survives
//!   restarts and supports concurrent readers with per-slug upserts.
//! * [`DeployRegistry`] — the in-memory routing table reconciled from both
//!   at startup ([`DeployRegistry::load_slots`]), plus the lazily-loaded
//!   per-slug workers that sessions are routed to.

mod error;
mod index;
mod registry;
mod store;

pub use error::RegistryError;
pub use index::{SlotIndex, SlotRecord};
pub use registry::{AgentWorker, DeployRegistry, DeployUpload};
pub use store::{BundleManifest, BundleStore};
