use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Location;

/// Artifact storage backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write bytes to a storage-relative destination.
    async fn write(&self, bytes: &[u8], destination: &str) -> DomainResult<Location>;

    /// Read back a previously written artifact.
    async fn read(&self, location: &Location) -> DomainResult<Vec<u8>>;

    /// Public URL of a location.
    fn url_for(&self, location: &Location) -> String;

    /// Whether the artifact is present.
    async fn exists(&self, location: &Location) -> DomainResult<bool>;
}
