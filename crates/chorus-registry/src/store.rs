//! On-disk bundle store.
//!
//! Layout: `<root>/<slug>/{manifest.json, worker.js, client.js}`. Writes
//! are transactional per slug: the new bundle is fully written to a hidden
//! sibling directory, then swapped in with renames. A deploy that dies
//! mid-write leaves the live directory untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RegistryError;

/// `manifest.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub slug: String,
    pub env: HashMap<String, String>,
}

/// Filesystem store rooted at the configured bundle directory.
pub struct BundleStore {
    root: PathBuf,
}

impl BundleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slug_dir(&self, slug: &str) -> PathBuf {
        self.root.join(slug)
    }

    /// Atomically (re)write the bundle for `slug`.
    pub async fn write_bundle(
        &self,
        manifest: &BundleManifest,
        worker_source: &str,
        client_source: &str,
    ) -> Result<(), RegistryError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let staging = self
            .root
            .join(format!(".tmp-{}-{}", manifest.slug, uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;

        let write = async {
            tokio::fs::write(
                staging.join("manifest.json"),
                serde_json::to_vec_pretty(manifest)?,
            )
            .await?;
            tokio::fs::write(staging.join("worker.js"), worker_source).await?;
            tokio::fs::write(staging.join("client.js"), client_source).await?;
            Ok::<(), RegistryError>(())
        };
        if let Err(e) = write.await {
            // Partial staging directory: clean up, previous version stays live.
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        // Swap: retire the live directory (if any), promote the staging one.
        let live = self.slug_dir(&manifest.slug);
        let retired = self
            .root
            .join(format!(".old-{}-{}", manifest.slug, uuid::Uuid::new_v4()));
        if tokio::fs::metadata(&live).await.is_ok() {
            tokio::fs::rename(&live, &retired).await?;
        }
        if let Err(e) = tokio::fs::rename(&staging, &live).await {
            // Promote failed — restore the previous version.
            if tokio::fs::metadata(&retired).await.is_ok() {
                let _ = tokio::fs::rename(&retired, &live).await;
            }
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }
        let _ = tokio::fs::remove_dir_all(&retired).await;

        debug!(slug = %manifest.slug, "bundle written");
        Ok(())
    }

    /// Read and parse `manifest.json` for `slug`.
    pub async fn read_manifest(&self, slug: &str) -> Result<BundleManifest, RegistryError> {
        let path = self.slug_dir(slug).join("manifest.json");
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|_| RegistryError::UnknownSlug(slug.to_string()))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn read_worker(&self, slug: &str) -> Result<String, RegistryError> {
        self.read_source(slug, "worker.js").await
    }

    pub async fn read_client(&self, slug: &str) -> Result<String, RegistryError> {
        self.read_source(slug, "client.js").await
    }

    async fn read_source(&self, slug: &str, file: &str) -> Result<String, RegistryError> {
        tokio::fs::read_to_string(self.slug_dir(slug).join(file))
            .await
            .map_err(|_| RegistryError::UnknownSlug(slug.to_string()))
    }

    /// Slugs present on disk, skipping staging/retired directories.
    pub async fn scan_slugs(&self) -> Result<Vec<String>, RegistryError> {
        let mut slugs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // No deploys yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(slugs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                warn!("bundle directory with non-UTF-8 name skipped");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            slugs.push(name);
        }
        slugs.sort();
        Ok(slugs)
    }
}

/// Validate a slug for use as a path segment and URL component.
pub(crate) fn validate_slug(slug: &str) -> Result<(), RegistryError> {
    let ok = !slug.is_empty()
        && slug.len() <= 64
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(RegistryError::InvalidDeploy(format!(
            "slug must be 1-64 chars of [a-z0-9_-], got {slug:?}"
        )))
    }
}
