//! Common test utilities for integration tests
//!
//! Provides shared fixtures used across multiple integration test files.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;

use trialnet::adapters::{InMemoryAssetRegistry, LocalStorage, StaticNodeSource};
use trialnet::domain::models::{Config, NodeSpec, TaskConfig};
use trialnet::domain::ports::{Analyzer, ExternalProbe};
use trialnet::services::{AssetCache, Assignment, Episode};
use trialnet::DomainResult;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Probe that accepts every URL.
pub struct AcceptingProbe;

#[async_trait]
impl ExternalProbe for AcceptingProbe {
    async fn probe(&self, _url: &str) -> DomainResult<()> {
        Ok(())
    }
}

/// Asset cache over local storage in `root` and an in-memory registry.
pub fn asset_cache(root: &Path) -> AssetCache {
    AssetCache::new(
        Arc::new(LocalStorage::new(root, "/static")),
        Arc::new(InMemoryAssetRegistry::new()),
        Arc::new(AcceptingProbe),
    )
}

/// `n` asset-free nodes named `s0..s{n-1}`.
pub fn nodes(n: usize) -> StaticNodeSource {
    StaticNodeSource::new(
        (0..n)
            .map(|i| NodeSpec::new(json!({ "stimulus_name": format!("s{i}") })))
            .collect(),
    )
}

/// Initialize an episode over `n_nodes` synthetic nodes.
pub async fn episode(task: TaskConfig, n_nodes: usize, analyzer: Arc<dyn Analyzer>) -> Episode {
    let dir = temp_dir();
    let config = Config {
        task,
        ..Default::default()
    };
    Episode::initialize(&config, &nodes(n_nodes), &asset_cache(dir.path()), analyzer)
        .await
        .expect("episode should initialize")
}

/// Open and frozen unit texts from a rendered step-tag page.
pub fn units(page: &Value) -> (Vec<String>, Vec<String>) {
    let texts = |field: &str| {
        page[field]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    (texts("open_units"), texts("frozen_units"))
}

/// Expect a trial assignment.
pub async fn next_trial(episode: &Episode, participant: Uuid) -> trialnet::Trial {
    match episode.next_trial(participant).await.expect("assignment") {
        Assignment::Trial(trial) => trial,
        other => panic!("expected a trial, got {other:?}"),
    }
}
