//! SQLite adapters for persistent engine state.

pub mod asset_registry;
pub mod connection;
pub mod migrations;

pub use asset_registry::SqliteAssetRegistry;
pub use connection::{open_memory_pool, open_pool, ConnectionError};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};

use sqlx::SqlitePool;

use crate::domain::models::DatabaseConfig;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Open (creating if needed) and migrate the configured database.
pub async fn initialize_database(config: &DatabaseConfig) -> Result<SqlitePool, DatabaseError> {
    let pool = open_pool(config).await?;
    Migrator::new(pool.clone()).run(all_embedded_migrations()).await?;
    Ok(pool)
}

/// In-memory, migrated pool for tests.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = open_memory_pool().await?;
    Migrator::new(pool.clone()).run(all_embedded_migrations()).await?;
    Ok(pool)
}
