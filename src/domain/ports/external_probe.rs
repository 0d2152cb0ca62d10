use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Checks that an externally hosted artifact exists and is reachable.
#[async_trait]
pub trait ExternalProbe: Send + Sync {
    async fn probe(&self, url: &str) -> DomainResult<()>;
}
