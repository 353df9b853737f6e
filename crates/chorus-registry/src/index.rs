//! SQLite slot index.
//!
//! One key-value table keyed by slug, carrying the bundle's env as a JSON
//! blob. Deploys upsert (`INSERT OR REPLACE`) — atomic at slug granularity;
//! readers share the pool freely.

use std::collections::HashMap;
use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};

use crate::error::RegistryError;

/// One indexed deploy slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub slug: String,
    pub env: HashMap<String, String>,
}

/// Persistent slug → env index.
pub struct SlotIndex {
    pool: SqlitePool,
}

impl SlotIndex {
    /// Open (creating if missing) the index at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true),
        )
        .await?;
        let index = Self { pool };
        index.ensure_schema().await?;
        Ok(index)
    }

    /// In-memory index for tests.
    pub async fn in_memory() -> Result<Self, RegistryError> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        let index = Self { pool };
        index.ensure_schema().await?;
        Ok(index)
    }

    async fn ensure_schema(&self) -> Result<(), RegistryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deploy_slots (
                slug TEXT PRIMARY KEY NOT NULL,
                env_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace the slot for `slug`.
    pub async fn upsert(
        &self,
        slug: &str,
        env: &HashMap<String, String>,
    ) -> Result<(), RegistryError> {
        let env_json = serde_json::to_string(env)?;
        let updated_at = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO deploy_slots (slug, env_json, updated_at) VALUES (?, ?, ?)",
        )
        .bind(slug)
        .bind(&env_json)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one slot.
    pub async fn get(&self, slug: &str) -> Result<Option<SlotRecord>, RegistryError> {
        let row = sqlx::query("SELECT slug, env_json FROM deploy_slots WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_row).transpose()
    }

    /// All indexed slots.
    pub async fn all(&self) -> Result<Vec<SlotRecord>, RegistryError> {
        let rows = sqlx::query("SELECT slug, env_json FROM deploy_slots ORDER BY slug")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(parse_row).collect()
    }

    /// Flush and close the pool. Called at shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_row(row: sqlx::sqlite::SqliteRow) -> Result<SlotRecord, RegistryError> {
    let slug: String = row.get("slug");
    let env_json: String = row.get("env_json");
    Ok(SlotRecord {
        slug,
        env: serde_json::from_str(&env_json)?,
    })
}
