//! Case persistence
//!
//! Defines the CaseStore interface and two implementations: SQLite via sqlx for
//! durable storage across restarts, and an in-memory store for tests and
//! throwaway sessions. Cases are stored as JSON next to indexed lookup columns.

use crate::case::types::Case;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row,
};
use std::path::Path;
use tokio::sync::RwLock;

/// Key under which the active case id is kept in workspace_state
const ACTIVE_CASE_KEY: &str = "active_case_id";

/// Durable key-value persistence for cases
///
/// Last write wins; a store serves a single active user.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Load every persisted case
    async fn load_all(&self) -> Result<Vec<Case>>;

    /// Replace the persisted case set with `cases`
    async fn save_all(&self, cases: &[Case]) -> Result<()>;

    async fn load_active_case_id(&self) -> Result<Option<String>>;

    async fn save_active_case_id(&self, id: Option<&str>) -> Result<()>;
}

/// SQLite-based case storage
#[derive(Debug, Clone)]
pub struct SqliteCaseStore {
    /// SQLite connection pool for the case database
    pool: SqlitePool,
}

impl SqliteCaseStore {
    /// Create new storage instance with an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file and initialize the schema
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!("Failed to create data directory '{}': {}", parent.display(), e)
            })?;
        }

        tracing::info!("🗄️ Opening case database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the case storage schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cases (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workspace_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_updated ON cases(updated_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl CaseStore for SqliteCaseStore {
    async fn load_all(&self) -> Result<Vec<Case>> {
        let rows = sqlx::query("SELECT definition FROM cases ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut cases = Vec::with_capacity(rows.len());
        for row in rows {
            let definition_json: String = row.get("definition");
            let case: Case = serde_json::from_str(&definition_json)?;
            cases.push(case);
        }

        Ok(cases)
    }

    /// Replace all rows inside one transaction so a crash never leaves a mix
    async fn save_all(&self, cases: &[Case]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cases").execute(&mut *tx).await?;

        for case in cases {
            let definition_json = serde_json::to_string(case)?;
            sqlx::query(
                r#"
                INSERT INTO cases (id, title, definition, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(case.id())
            .bind(case.title())
            .bind(&definition_json)
            .bind(case.created_at().to_rfc3339())
            .bind(case.last_modified_at().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!("💾 Saved {} cases", cases.len());

        Ok(())
    }

    async fn load_active_case_id(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM workspace_state WHERE key = ?")
            .bind(ACTIVE_CASE_KEY)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn save_active_case_id(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => {
                sqlx::query(
                    r#"
                    INSERT INTO workspace_state (key, value) VALUES (?, ?)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value
                    "#,
                )
                .bind(ACTIVE_CASE_KEY)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM workspace_state WHERE key = ?")
                    .bind(ACTIVE_CASE_KEY)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }
}

/// In-memory case storage
#[derive(Debug, Default)]
pub struct MemoryCaseStore {
    cases: RwLock<Vec<Case>>,
    active_case_id: RwLock<Option<String>>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn load_all(&self) -> Result<Vec<Case>> {
        Ok(self.cases.read().await.clone())
    }

    async fn save_all(&self, cases: &[Case]) -> Result<()> {
        *self.cases.write().await = cases.to_vec();
        Ok(())
    }

    async fn load_active_case_id(&self) -> Result<Option<String>> {
        Ok(self.active_case_id.read().await.clone())
    }

    async fn save_active_case_id(&self, id: Option<&str>) -> Result<()> {
        *self.active_case_id.write().await = id.map(str::to_string);
        Ok(())
    }
}
