use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;

/// Produces an asset's files inside a scratch directory.
///
/// Single-file generators write exactly one file; folder generators may
/// write any number of files and subdirectories.
#[async_trait]
pub trait AssetGenerator: Send + Sync {
    async fn generate(&self, scratch: &Path, params: &Value) -> DomainResult<()>;
}

#[async_trait]
impl<F> AssetGenerator for F
where
    F: Fn(&Path, &Value) -> DomainResult<()> + Send + Sync,
{
    async fn generate(&self, scratch: &Path, params: &Value) -> DomainResult<()> {
        self(scratch, params)
    }
}
