//! Node source implementations.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AssetDeclaration, NodeSpec};
use crate::domain::ports::NodeSource;

/// A fixed list of nodes.
#[derive(Debug, Clone, Default)]
pub struct StaticNodeSource {
    nodes: Vec<NodeSpec>,
}

impl StaticNodeSource {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl NodeSource for StaticNodeSource {
    async fn load(&self) -> DomainResult<Vec<NodeSpec>> {
        Ok(self.nodes.clone())
    }
}

/// One node per file with a given extension in a directory.
///
/// Files are sorted by name. Each node's definition carries
/// `stimulus_name` (the file stem) and the file itself is attached as a
/// `File` asset under `asset_name`.
#[derive(Debug, Clone)]
pub struct DirectoryNodeSource {
    dir: PathBuf,
    extension: String,
    asset_name: String,
    persistent: bool,
}

impl DirectoryNodeSource {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
            asset_name: "stimulus".to_string(),
            persistent: true,
        }
    }

    #[must_use]
    pub fn asset_name(mut self, name: impl Into<String>) -> Self {
        self.asset_name = name.into();
        self
    }

    #[must_use]
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub(crate) async fn list_files(&self) -> DomainResult<Vec<(String, PathBuf)>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            DomainError::ValidationFailed(format!("cannot scan {}: {e}", self.dir.display()))
        })?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension));
            if !matches || !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl NodeSource for DirectoryNodeSource {
    async fn load(&self) -> DomainResult<Vec<NodeSpec>> {
        let files = self.list_files().await?;
        Ok(files
            .into_iter()
            .map(|(stem, path)| {
                let mut asset = AssetDeclaration::file(path);
                if self.persistent {
                    asset = asset.cached();
                }
                NodeSpec::new(json!({ "stimulus_name": stem })).with_asset(&self.asset_name, asset)
            })
            .collect())
    }
}

/// Every ordered pair of distinct stimuli, for similarity judgements.
///
/// Stimulus files are attached to both sides of the pair as `stimulus_a`
/// and `stimulus_b`; identical files share one cached asset.
#[derive(Debug, Clone)]
pub struct PairwiseNodeSource {
    stimuli: DirectoryNodeSource,
}

impl PairwiseNodeSource {
    pub fn new(stimuli: DirectoryNodeSource) -> Self {
        Self { stimuli }
    }
}

#[async_trait]
impl NodeSource for PairwiseNodeSource {
    async fn load(&self) -> DomainResult<Vec<NodeSpec>> {
        let files = self.stimuli.list_files().await?;
        let declare = |path: &PathBuf| {
            let asset = AssetDeclaration::file(path.clone());
            if self.stimuli.persistent {
                asset.cached()
            } else {
                asset
            }
        };

        let mut nodes = Vec::with_capacity(files.len() * files.len().saturating_sub(1));
        for (name_a, path_a) in &files {
            for (name_b, path_b) in &files {
                if name_a == name_b {
                    continue;
                }
                nodes.push(
                    NodeSpec::new(json!({ "stimulus_a": name_a, "stimulus_b": name_b }))
                        .with_asset("stimulus_a", declare(path_a))
                        .with_asset("stimulus_b", declare(path_b)),
                );
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_directory_source_filters_and_sorts() {
        let dir = fixture(&["b.mp3", "a.MP3", "notes.txt"]);
        let nodes = DirectoryNodeSource::new(dir.path(), ".mp3").load().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].definition["stimulus_name"], "a");
        assert!(nodes[0].assets["stimulus"].is_persistent());
    }

    #[tokio::test]
    async fn test_pairwise_source_counts_ordered_pairs() {
        let dir = fixture(&["flute.mp3", "oboe.mp3", "viola.mp3"]);
        let nodes = PairwiseNodeSource::new(DirectoryNodeSource::new(dir.path(), "mp3"))
            .load()
            .await
            .unwrap();
        assert_eq!(nodes.len(), 6);
        assert!(nodes
            .iter()
            .all(|n| n.definition["stimulus_a"] != n.definition["stimulus_b"]));
    }

    #[tokio::test]
    async fn test_missing_directory_is_validation_error() {
        let result = DirectoryNodeSource::new("/definitely/not/here", "mp3").load().await;
        assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
    }
}
