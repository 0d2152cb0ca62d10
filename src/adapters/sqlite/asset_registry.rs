//! SQLite-backed persistent asset registry.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AssetKey, Location};
use crate::domain::ports::AssetRegistry;

#[derive(Debug, Clone)]
pub struct SqliteAssetRegistry {
    pool: SqlitePool,
}

impl SqliteAssetRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

type Row = (String, String, String, bool);

fn row_to_entry((key, path, url, is_folder): Row) -> (AssetKey, Location) {
    (AssetKey::from_raw(key), Location { path, url, is_folder })
}

#[async_trait]
impl AssetRegistry for SqliteAssetRegistry {
    async fn get(&self, key: &AssetKey) -> DomainResult<Option<Location>> {
        let row: Option<Row> = sqlx::query_as(
            "SELECT key, path, url, is_folder FROM asset_registry WHERE key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_entry(r).1))
    }

    async fn put(&self, key: &AssetKey, location: &Location) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO asset_registry (key, path, url, is_folder, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(key.as_str())
        .bind(&location.path)
        .bind(&location.url)
        .bind(location.is_folder)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<(AssetKey, Location)>> {
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT key, path, url, is_folder FROM asset_registry ORDER BY created_at, key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_entry).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    fn location(path: &str) -> Location {
        Location {
            path: path.to_string(),
            url: format!("/static/{path}"),
            is_folder: false,
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let registry = SqliteAssetRegistry::new(create_migrated_test_pool().await.unwrap());
        let key = AssetKey::for_content(b"stimulus");
        assert!(registry.get(&key).await.unwrap().is_none());

        registry.put(&key, &location("cache/a.wav")).await.unwrap();
        assert_eq!(registry.get(&key).await.unwrap(), Some(location("cache/a.wav")));
    }

    #[tokio::test]
    async fn test_put_is_write_once() {
        let registry = SqliteAssetRegistry::new(create_migrated_test_pool().await.unwrap());
        let key = AssetKey::for_content(b"stimulus");
        registry.put(&key, &location("cache/first.wav")).await.unwrap();
        registry.put(&key, &location("cache/second.wav")).await.unwrap();

        assert_eq!(registry.get(&key).await.unwrap(), Some(location("cache/first.wav")));
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }
}
