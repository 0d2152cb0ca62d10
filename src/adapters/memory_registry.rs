//! Process-local asset registry, used when no database is configured.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AssetKey, Location};
use crate::domain::ports::AssetRegistry;

#[derive(Debug, Default)]
pub struct InMemoryAssetRegistry {
    entries: RwLock<BTreeMap<AssetKey, Location>>,
}

impl InMemoryAssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetRegistry for InMemoryAssetRegistry {
    async fn get(&self, key: &AssetKey) -> DomainResult<Option<Location>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &AssetKey, location: &Location) -> DomainResult<()> {
        self.entries
            .write()
            .await
            .entry(key.clone())
            .or_insert_with(|| location.clone());
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<(AssetKey, Location)>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
