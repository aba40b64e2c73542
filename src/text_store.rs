//! SQLite-backed [`TextStore`] implementation.
//!
//! Records live in the `document_texts` table. The flattened
//! [`DocumentTextKey::storage_key`] is the primary key; the individual key
//! parts are stored alongside so a whole project can be purged by
//! `project_id`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use project_sync_core::text::{DocumentTextKey, TextRecord, TextStore};

/// SQLite implementation of the [`TextStore`] trait.
pub struct SqliteTextStore {
    pool: SqlitePool,
}

impl SqliteTextStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Wrap `pool`, upgrading the schema first if the file is behind.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        crate::migrate::upgrade_text_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl TextStore for SqliteTextStore {
    async fn put_document_text(&self, key: &DocumentTextKey, text: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_texts (key, scope, project_id, agent_id, document_id, text, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                text = excluded.text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.storage_key())
        .bind(key.scope.as_str())
        .bind(&key.project_id)
        .bind(&key.agent_id)
        .bind(&key.document_id)
        .bind(text)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document_text(&self, key: &DocumentTextKey) -> Result<Option<TextRecord>> {
        let row = sqlx::query("SELECT text, updated_at FROM document_texts WHERE key = ?")
            .bind(key.storage_key())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let ts: i64 = row.get("updated_at");
            TextRecord {
                text: row.get("text"),
                updated_at: chrono::DateTime::from_timestamp(ts, 0).unwrap_or_default(),
            }
        }))
    }

    async fn delete_document_text(&self, key: &DocumentTextKey) -> Result<()> {
        sqlx::query("DELETE FROM document_texts WHERE key = ?")
            .bind(key.storage_key())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_project_texts(&self, project_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_texts WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
