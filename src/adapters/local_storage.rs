//! Local filesystem storage backend.
//!
//! Artifacts are written to `root/<destination>` and served under
//! `base_url/<destination>`. Writes go through a temporary sibling file and
//! a rename, so readers never observe a partially written artifact.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Location;
use crate::domain::ports::Storage;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> DomainResult<PathBuf> {
        let rel = Path::new(relative);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if relative.is_empty() || !clean {
            return Err(DomainError::StorageError(format!(
                "destination '{relative}' must be a relative path without '..'"
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, bytes: &[u8], destination: &str) -> DomainResult<Location> {
        let target = self.resolve(destination)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = target.with_extension(format!("partial-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &target).await?;

        let mut location = Location {
            path: destination.to_string(),
            url: String::new(),
            is_folder: false,
        };
        location.url = self.url_for(&location);
        Ok(location)
    }

    async fn read(&self, location: &Location) -> DomainResult<Vec<u8>> {
        let path = self.resolve(&location.path)?;
        tokio::fs::read(&path).await.map_err(|e| {
            DomainError::StorageError(format!("cannot read {}: {e}", path.display()))
        })
    }

    fn url_for(&self, location: &Location) -> String {
        format!("{}/{}", self.base_url, location.path)
    }

    async fn exists(&self, location: &Location) -> DomainResult<bool> {
        let path = self.resolve(&location.path)?;
        Ok(tokio::fs::try_exists(path).await?)
    }
}
