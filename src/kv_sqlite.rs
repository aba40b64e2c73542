//! SQLite-backed [`KvStore`] implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use project_sync_core::kv::KvStore;

/// Key-value store over the `kv` table (see [`crate::migrate::migrate_kv`]).
pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the pool and make sure the table exists.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        crate::migrate::migrate_kv(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // LIKE is case-insensitive in SQLite; compare the exact prefix instead.
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM kv WHERE substr(key, 1, ?) = ? ORDER BY key")
                .bind(prefix.chars().count() as i64)
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_prefix_listing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("kv.sqlite"))
            .await
            .unwrap();
        let kv = SqliteKv::open(pool).await.unwrap();

        kv.set("compliance-aaaa-projects", "[]").await.unwrap();
        kv.set("compliance-aaaa-projects", "[1]").await.unwrap();
        kv.set("compliance-aaab-projects", "[]").await.unwrap();
        kv.set("compliance-AAAA-projects", "{}").await.unwrap();

        assert_eq!(
            kv.get("compliance-aaaa-projects").await.unwrap().as_deref(),
            Some("[1]")
        );
        assert_eq!(
            kv.keys_with_prefix("compliance-aaaa-").await.unwrap(),
            vec!["compliance-aaaa-projects"]
        );

        kv.remove("compliance-aaaa-projects").await.unwrap();
        assert!(kv.get("compliance-aaaa-projects").await.unwrap().is_none());
    }
}
