//! Schema migrations for the two local databases.
//!
//! The key-value database has a single table. The document text database
//! is versioned through `PRAGMA user_version` and upgraded in place, one
//! step at a time, whenever [`TEXT_SCHEMA_VERSION`] is ahead of the file.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Current schema version of the document text database.
pub const TEXT_SCHEMA_VERSION: i64 = 2;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let kv = db::connect_kv(config).await?;
    migrate_kv(&kv).await?;
    kv.close().await;

    let text = db::connect_text(config).await?;
    upgrade_text_schema(&text).await?;
    text.close().await;
    Ok(())
}

pub async fn migrate_kv(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating kv table")?;
    Ok(())
}

/// Bring the document text database up to [`TEXT_SCHEMA_VERSION`].
///
/// Returns the version the file was at before upgrading.
pub async fn upgrade_text_schema(pool: &SqlitePool) -> Result<i64> {
    let from: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    if from > TEXT_SCHEMA_VERSION {
        anyhow::bail!(
            "document text database is at schema version {}, newer than supported {}",
            from,
            TEXT_SCHEMA_VERSION
        );
    }

    let mut tx = pool.begin().await?;

    if from < 1 {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_texts (
                key TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                project_id TEXT,
                agent_id TEXT,
                document_id TEXT NOT NULL,
                text TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;
    }

    if from < 2 {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_document_texts_project ON document_texts(project_id)",
        )
        .execute(&mut *tx)
        .await?;
    }

    if from < TEXT_SCHEMA_VERSION {
        // PRAGMA does not accept bound parameters.
        sqlx::query(&format!("PRAGMA user_version = {}", TEXT_SCHEMA_VERSION))
            .execute(&mut *tx)
            .await?;
        tracing::info!(from, to = TEXT_SCHEMA_VERSION, "upgraded document text schema");
    }

    tx.commit().await?;
    Ok(from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_schema_upgrades_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("texts.sqlite"))
            .await
            .unwrap();

        assert_eq!(upgrade_text_schema(&pool).await.unwrap(), 0);
        assert_eq!(
            upgrade_text_schema(&pool).await.unwrap(),
            TEXT_SCHEMA_VERSION
        );

        let has_index: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='index' AND name='idx_document_texts_project'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(has_index);
    }

    #[tokio::test]
    async fn v1_file_is_upgraded_in_place() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("texts.sqlite"))
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE document_texts (key TEXT PRIMARY KEY, scope TEXT NOT NULL, project_id TEXT, agent_id TEXT, document_id TEXT NOT NULL, text TEXT NOT NULL, updated_at INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO document_texts VALUES ('uploaded|p|-|d', 'uploaded', 'p', NULL, 'd', 'kept', 0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("PRAGMA user_version = 1")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(upgrade_text_schema(&pool).await.unwrap(), 1);
        let text: String = sqlx::query_scalar("SELECT text FROM document_texts WHERE key = 'uploaded|p|-|d'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(text, "kept");
    }

    #[tokio::test]
    async fn newer_file_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("texts.sqlite"))
            .await
            .unwrap();
        sqlx::query("PRAGMA user_version = 99")
            .execute(&pool)
            .await
            .unwrap();
        assert!(upgrade_text_schema(&pool).await.is_err());
    }
}
