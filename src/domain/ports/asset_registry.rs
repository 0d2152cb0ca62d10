use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AssetKey, Location};

/// Key to location mapping for persistent assets.
///
/// Entries are write-once: a ready asset never moves.
#[async_trait]
pub trait AssetRegistry: Send + Sync {
    async fn get(&self, key: &AssetKey) -> DomainResult<Option<Location>>;

    /// Record a mapping; an existing entry for the key is left untouched.
    async fn put(&self, key: &AssetKey, location: &Location) -> DomainResult<()>;

    async fn list(&self) -> DomainResult<Vec<(AssetKey, Location)>>;
}
