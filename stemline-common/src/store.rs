//! Thin SQLite-backed persistence (`DB_PATH`).
//!
//! Deliberately small: one table for manifests the Sync Router has
//! already synced successfully (so a restart does not immediately re-send
//! delivered artifacts), one table for job-state breadcrumbs used only
//! for operator visibility during crash recovery. Neither table gates
//! correctness — the filesystem remains authoritative.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            db_path.display()
        ))?
        .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS synced_manifests (
                job_id TEXT NOT NULL,
                manifest_mtime INTEGER NOT NULL,
                synced_at TEXT NOT NULL,
                PRIMARY KEY (job_id, manifest_mtime)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_state (
                job_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Record that a manifest (identified by job id + its mtime, which
    /// changes if the manifest is ever rewritten) has been fully synced.
    pub async fn mark_manifest_synced(&self, job_id: &str, manifest_mtime: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO synced_manifests (job_id, manifest_mtime, synced_at) VALUES (?, ?, ?)",
        )
        .bind(job_id)
        .bind(manifest_mtime)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether this exact manifest (by job id + mtime) has already been
    /// fully synced.
    pub async fn is_manifest_synced(&self, job_id: &str, manifest_mtime: i64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM synced_manifests WHERE job_id = ? AND manifest_mtime = ?",
        )
        .bind(job_id)
        .bind(manifest_mtime)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Record the Processor's current state for a job, for operator
    /// visibility only.
    pub async fn set_job_state(&self, job_id: &str, state: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO job_state (job_id, state, updated_at) VALUES (?, ?, ?)",
        )
        .bind(job_id)
        .bind(state)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synced_manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("state.db")).await.unwrap();

        assert!(!store.is_manifest_synced("job-1", 100).await.unwrap());
        store.mark_manifest_synced("job-1", 100).await.unwrap();
        assert!(store.is_manifest_synced("job-1", 100).await.unwrap());
        // A later rewrite (different mtime) is treated as unsynced.
        assert!(!store.is_manifest_synced("job-1", 200).await.unwrap());
    }

    #[tokio::test]
    async fn job_state_breadcrumbs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("state.db")).await.unwrap();
        store.set_job_state("job-1", "SEPARATING").await.unwrap();
        store.set_job_state("job-1", "PUBLISHED").await.unwrap();
    }
}
