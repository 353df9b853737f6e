//! The deploy registry proper: reconciliation, validation, worker routing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use chorus_core::AgentDefinition;
use chorus_core::config::REQUIRED_PLATFORM_SECRETS;

use crate::error::RegistryError;
use crate::index::SlotIndex;
use crate::store::{BundleManifest, BundleStore, validate_slug};

/// A deploy upload, as received by `POST /deploy`.
#[derive(Debug, Clone)]
pub struct DeployUpload {
    pub slug: String,
    pub env: HashMap<String, String>,
    pub worker_source: String,
    pub client_source: String,
}

/// A hot-loaded per-slug worker: the agent definition plus its env (the
/// secrets snapshot handed to each session's sandbox).
pub struct AgentWorker {
    pub definition: Arc<AgentDefinition>,
    pub env: HashMap<String, String>,
}

/// Process-wide registry of deployed agents.
///
/// The slot map and worker map are the only process-wide mutable state in
/// the system; their locks are held only for lookup/insert — bundle I/O and
/// worker loading happen outside any lock.
pub struct DeployRegistry {
    store: BundleStore,
    index: SlotIndex,
    /// slug → env for every exposed deploy.
    slots: RwLock<HashMap<String, HashMap<String, String>>>,
    /// Lazily loaded workers. A failed load is not cached: the next
    /// request retries, which is also how a crashed worker restarts.
    workers: Mutex<HashMap<String, Arc<AgentWorker>>>,
}

impl DeployRegistry {
    pub fn new(store: BundleStore, index: SlotIndex) -> Self {
        Self {
            store,
            index,
            slots: RwLock::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile disk and index at process start.
    ///
    /// * on disk + valid env → exposed (and backfilled into the index when
    ///   the index lost it)
    /// * in the index but missing on disk → skipped
    /// * corrupted manifest → skipped with a warning
    pub async fn load_slots(&self) -> Result<usize, RegistryError> {
        let disk_slugs = self.store.scan_slugs().await?;
        let indexed: HashMap<String, _> = self
            .index
            .all()
            .await?
            .into_iter()
            .map(|record| (record.slug.clone(), record))
            .collect();

        let mut exposed = 0usize;
        for slug in disk_slugs {
            let manifest = match self.store.read_manifest(&slug).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(slug = %slug, error = %e, "corrupted bundle manifest skipped");
                    continue;
                }
            };
            if let Err(e) = validate_env(&manifest.env) {
                warn!(slug = %slug, error = %e, "bundle with invalid env skipped");
                continue;
            }
            if !indexed.contains_key(&slug) {
                info!(slug = %slug, "backfilling slot index from on-disk manifest");
                self.index.upsert(&slug, &manifest.env).await?;
            }
            self.slots
                .write()
                .unwrap()
                .insert(slug.clone(), manifest.env);
            exposed += 1;
        }

        for slug in indexed.keys() {
            if !self.slots.read().unwrap().contains_key(slug) {
                warn!(slug = %slug, "indexed slot has no on-disk bundle, skipping");
            }
        }

        info!(slots = exposed, "deploy slots loaded");
        Ok(exposed)
    }

    /// Handle a deploy upload: validate, persist, index, expose.
    pub async fn deploy(&self, upload: DeployUpload) -> Result<(), RegistryError> {
        validate_slug(&upload.slug)?;
        validate_env(&upload.env)?;
        if upload.worker_source.trim().is_empty() {
            return Err(RegistryError::InvalidDeploy(
                "worker source is empty".to_string(),
            ));
        }

        let manifest = BundleManifest {
            slug: upload.slug.clone(),
            env: upload.env.clone(),
        };
        self.store
            .write_bundle(&manifest, &upload.worker_source, &upload.client_source)
            .await?;
        self.index.upsert(&upload.slug, &upload.env).await?;

        self.slots
            .write()
            .unwrap()
            .insert(upload.slug.clone(), upload.env);
        // Drop any cached worker so the next session sees the new bundle.
        self.workers.lock().unwrap().remove(&upload.slug);

        info!(slug = %upload.slug, "deploy complete");
        Ok(())
    }

    /// Whether a slug is deployed and exposed.
    #[must_use]
    pub fn has_slot(&self, slug: &str) -> bool {
        self.slots.read().unwrap().contains_key(slug)
    }

    /// Exposed slugs, sorted.
    #[must_use]
    pub fn slugs(&self) -> Vec<String> {
        let mut slugs: Vec<_> = self.slots.read().unwrap().keys().cloned().collect();
        slugs.sort();
        slugs
    }

    /// Get (spawning if needed) the worker for `slug`.
    pub async fn worker(&self, slug: &str) -> Result<Arc<AgentWorker>, RegistryError> {
        if let Some(worker) = self.workers.lock().unwrap().get(slug) {
            return Ok(Arc::clone(worker));
        }

        let env = self
            .slots
            .read()
            .unwrap()
            .get(slug)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSlug(slug.to_string()))?;

        // Load outside the lock; concurrent first requests may race, the
        // last insert wins and they share equivalent definitions.
        let worker_source = self.store.read_worker(slug).await?;
        let definition = chorus_sandbox::load_agent(slug, &worker_source)
            .await
            .map_err(|e| {
                warn!(slug = %slug, error = %e, "worker load failed");
                RegistryError::WorkerLoad {
                    slug: slug.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let worker = Arc::new(AgentWorker {
            definition: Arc::new(definition),
            env,
        });
        self.workers
            .lock()
            .unwrap()
            .insert(slug.to_string(), Arc::clone(&worker));
        debug!(slug = %slug, "worker loaded");
        Ok(worker)
    }

    /// The bundled client source for `slug`.
    pub async fn client_source(&self, slug: &str) -> Result<String, RegistryError> {
        if !self.has_slot(slug) {
            return Err(RegistryError::UnknownSlug(slug.to_string()));
        }
        self.store.read_client(slug).await
    }

    /// Flush persistent state at shutdown.
    pub async fn shutdown(&self) {
        self.workers.lock().unwrap().clear();
        self.index.close().await;
    }
}

/// A deploy's env must carry every required platform secret.
fn validate_env(env: &HashMap<String, String>) -> Result<(), RegistryError> {
    for key in REQUIRED_PLATFORM_SECRETS {
        match env.get(*key) {
            Some(value) if !value.trim().is_empty() => {}
            _ => {
                return Err(RegistryError::InvalidDeploy(format!(
                    "env is missing required secret {key}"
                )));
            }
        }
    }
    Ok(())
}
