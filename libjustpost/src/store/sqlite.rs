//! SQLite-backed persistence for sealed values.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::KvBackend;
use crate::error::StoreError;
use crate::types::now_millis;

#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn connect(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            db_path.to_string_lossy().replace('\\', "/")
        );

        let pool = SqlitePool::connect(&db_url).await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database. A single connection keeps every query on the same database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Delete every expired row, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM secrets
            WHERE expires_at IS NOT NULL AND expires_at <= ?
            "#,
        )
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT value, expires_at
            FROM secrets
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: Option<i64> = row.get("expires_at");
        if expires_at.is_some_and(|at| at <= now_millis()) {
            self.delete(key).await?;
            return Ok(None);
        }

        Ok(Some(row.get::<Vec<u8>, _>("value")))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = now_millis();
        let expires_at = ttl.map(|ttl| {
            now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
        });

        sqlx::query(
            r#"
            INSERT INTO secrets (key, value, expires_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM secrets WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = SqliteBackend::in_memory().await.unwrap();

        backend.set("twitter_tokens:u1", b"sealed".to_vec(), None).await.unwrap();
        assert_eq!(
            backend.get("twitter_tokens:u1").await.unwrap(),
            Some(b"sealed".to_vec())
        );

        assert!(backend.delete("twitter_tokens:u1").await.unwrap());
        assert_eq!(backend.get("twitter_tokens:u1").await.unwrap(), None);
        assert!(!backend.delete("twitter_tokens:u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_replaces_value_and_ttl() {
        let backend = SqliteBackend::in_memory().await.unwrap();

        backend
            .set("k", b"first".to_vec(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        backend.set("k", b"second".to_vec(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(backend.get("k").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_expired_rows_read_as_absent() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend
            .set("twitter_pkce:u1", b"pending".to_vec(), Some(Duration::from_millis(1)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.get("twitter_pkce:u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend
            .set("a", b"1".to_vec(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        backend.set("b", b"2".to_vec(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert!(backend.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("secrets.db");

        {
            let backend = SqliteBackend::connect(&path).await.unwrap();
            backend.set("bluesky:u1", b"sealed".to_vec(), None).await.unwrap();
        }

        let backend = SqliteBackend::connect(&path).await.unwrap();
        assert_eq!(
            backend.get("bluesky:u1").await.unwrap(),
            Some(b"sealed".to_vec())
        );
    }
}
