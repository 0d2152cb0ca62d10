//! CLI command implementations.

pub mod assets;
pub mod config;
pub mod simulate;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::adapters::sqlite::initialize_database;
use crate::adapters::{HttpProbe, LocalStorage, SqliteAssetRegistry};
use crate::domain::models::Config;
use crate::services::AssetCache;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the persistent asset registry described by the configuration.
pub(crate) async fn open_registry(config: &Config) -> Result<SqliteAssetRegistry> {
    let pool = initialize_database(&config.database)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
    Ok(SqliteAssetRegistry::new(pool))
}

/// Asset cache wired to local storage, the SQLite registry and an HTTP probe.
pub(crate) async fn build_asset_cache(config: &Config) -> Result<AssetCache> {
    let registry = open_registry(config).await?;
    let storage = LocalStorage::new(Path::new(&config.storage.root), config.storage.base_url.clone());
    let probe = HttpProbe::new(PROBE_TIMEOUT).context("Failed to build external asset probe")?;
    Ok(AssetCache::new(Arc::new(storage), Arc::new(registry), Arc::new(probe)))
}
