//! Key-addressed memoized asset store.
//!
//! Each [`AssetKey`] maps to a `tokio::sync::OnceCell<Location>`. Concurrent
//! `ensure` calls for the same key collapse into one generation: the first
//! caller runs the generator while the rest await the cell. A failed
//! generation leaves the cell empty so a later call can try again.
//!
//! Persistent assets are stored under `cache/<key>/` and recorded in the
//! [`AssetRegistry`], so a restart finds them without regenerating.
//! Non-persistent assets are stored under `runs/<run_id>/<key>/` and are
//! only known to this process. A later persistent request for a key that
//! was first materialized for the run copies the stored files to `cache/`
//! and registers them; the generator is not run again.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AssetDeclaration, AssetKey, AssetRecord, Location, MaterializationState};
use crate::domain::ports::{AssetGenerator, AssetRegistry, ExternalProbe, Storage};

/// How a generated artifact is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    pub persistent: bool,
    pub is_folder: bool,
}

/// A materialized artifact and the files it was stored as.
#[derive(Debug, Clone)]
struct Stored {
    location: Location,
    persistent: bool,
    prefix: String,
    files: Vec<String>,
}

#[derive(Default)]
struct Entry {
    cell: OnceCell<Stored>,
    /// Persistent copy of a run-scoped artifact
    promoted: OnceCell<Location>,
    generating: AtomicBool,
    persistent: AtomicBool,
}

impl Entry {
    fn location(&self) -> Option<Location> {
        self.promoted
            .get()
            .or_else(|| self.cell.get().map(|stored| &stored.location))
            .cloned()
    }
}

fn generation_failure(key: &AssetKey, error: DomainError) -> DomainError {
    match error {
        DomainError::AssetGenerationFailure { .. } => error,
        other => DomainError::AssetGenerationFailure {
            asset: key.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Copies a source file into the scratch directory under its own name.
struct CopyFile(PathBuf);

#[async_trait]
impl AssetGenerator for CopyFile {
    async fn generate(&self, scratch: &Path, _params: &Value) -> DomainResult<()> {
        let name = self
            .0
            .file_name()
            .ok_or_else(|| DomainError::ValidationFailed(format!("{} has no file name", self.0.display())))?;
        tokio::fs::copy(&self.0, scratch.join(name)).await?;
        Ok(())
    }
}

pub struct AssetCache {
    storage: Arc<dyn Storage>,
    registry: Arc<dyn AssetRegistry>,
    probe: Arc<dyn ExternalProbe>,
    generators: HashMap<String, Arc<dyn AssetGenerator>>,
    run_id: Uuid,
    entries: Mutex<HashMap<AssetKey, Arc<Entry>>>,
}

impl AssetCache {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<dyn AssetRegistry>,
        probe: Arc<dyn ExternalProbe>,
    ) -> Self {
        Self {
            storage,
            registry,
            probe,
            generators: HashMap::new(),
            run_id: Uuid::new_v4(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a named generator for `Generated` declarations.
    #[must_use]
    pub fn with_generator(mut self, name: impl Into<String>, generator: Arc<dyn AssetGenerator>) -> Self {
        self.generators.insert(name.into(), generator);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    async fn entry(&self, key: &AssetKey) -> Arc<Entry> {
        self.entries.lock().await.entry(key.clone()).or_default().clone()
    }

    /// Key a declaration resolves to. `File` keys require reading the file.
    pub async fn key_for(&self, declaration: &AssetDeclaration) -> DomainResult<AssetKey> {
        match declaration {
            AssetDeclaration::File { path, .. } => {
                let bytes = tokio::fs::read(path).await.map_err(|e| DomainError::AssetGenerationFailure {
                    asset: declaration.label(),
                    reason: format!("cannot read source file: {e}"),
                })?;
                Ok(AssetKey::for_content(&bytes))
            }
            AssetDeclaration::Generated { generator, params, .. } => {
                Ok(AssetKey::for_generated(generator, params))
            }
            AssetDeclaration::External { url } => Ok(AssetKey::for_url(url)),
        }
    }

    /// Materialize a declaration, returning where it lives.
    pub async fn ensure(&self, declaration: &AssetDeclaration) -> DomainResult<Location> {
        let key = self.key_for(declaration).await?;
        match declaration {
            AssetDeclaration::File { path, persistent } => {
                let options = GenerateOptions {
                    persistent: *persistent,
                    is_folder: false,
                };
                self.ensure_with(&key, &CopyFile(path.clone()), &Value::Null, options)
                    .await
            }
            AssetDeclaration::Generated {
                generator,
                params,
                is_folder,
                persistent,
            } => {
                let generator_impl = self.generators.get(generator).cloned().ok_or_else(|| {
                    DomainError::AssetGenerationFailure {
                        asset: declaration.label(),
                        reason: format!("no generator registered under '{generator}'"),
                    }
                })?;
                let options = GenerateOptions {
                    persistent: *persistent,
                    is_folder: *is_folder,
                };
                self.ensure_with(&key, generator_impl.as_ref(), params, options)
                    .await
            }
            AssetDeclaration::External { url } => self.ensure_external(&key, url).await,
        }
    }

    /// Materialize `key` with an explicit generator.
    ///
    /// At most one generation per key runs at a time; every caller receives
    /// the same [`Location`]. A persistent request for a key materialized
    /// for this run only is answered from the promoted `cache/` copy.
    #[instrument(skip(self, key, generator, params), fields(key = %key))]
    pub async fn ensure_with<G>(
        &self,
        key: &AssetKey,
        generator: &G,
        params: &Value,
        options: GenerateOptions,
    ) -> DomainResult<Location>
    where
        G: AssetGenerator + ?Sized,
    {
        let entry = self.entry(key).await;
        if options.persistent {
            entry.persistent.store(true, Ordering::Relaxed);
        }
        let stored = entry
            .cell
            .get_or_try_init(|| async {
                entry.generating.store(true, Ordering::Release);
                let result = self.materialize(key, generator, params, options).await;
                entry.generating.store(false, Ordering::Release);
                result.map_err(|e| generation_failure(key, e))
            })
            .await?
            .clone();

        if options.persistent && !stored.persistent {
            return entry
                .promoted
                .get_or_try_init(|| async {
                    self.promote(key, &stored)
                        .await
                        .map_err(|e| generation_failure(key, e))
                })
                .await
                .cloned();
        }
        Ok(entry.promoted.get().cloned().unwrap_or(stored.location))
    }

    async fn materialize<G>(
        &self,
        key: &AssetKey,
        generator: &G,
        params: &Value,
        options: GenerateOptions,
    ) -> DomainResult<Stored>
    where
        G: AssetGenerator + ?Sized,
    {
        if options.persistent {
            if let Some(location) = self.registered(key).await? {
                return Ok(Stored {
                    prefix: location.path.clone(),
                    location,
                    persistent: true,
                    files: Vec::new(),
                });
            }
        }

        let prefix = if options.persistent {
            format!("cache/{key}")
        } else {
            format!("runs/{}/{key}", self.run_id)
        };
        let scratch = tempfile::tempdir()?;
        generator.generate(scratch.path(), params).await?;
        let files: Vec<String> = collect_files(scratch.path())
            .await?
            .iter()
            .map(|p| relative_str(p))
            .collect();
        if !options.is_folder && files.len() != 1 {
            return Err(DomainError::AssetGenerationFailure {
                asset: key.to_string(),
                reason: format!("generator produced {} files, expected exactly one", files.len()),
            });
        }

        let mut written = None;
        for relative in &files {
            let bytes = tokio::fs::read(scratch.path().join(relative)).await?;
            written = Some(self.storage.write(&bytes, &format!("{prefix}/{relative}")).await?);
        }
        let location = self.stored_location(&prefix, options.is_folder, written);

        if options.persistent {
            self.registry.put(key, &location).await?;
        }
        info!(
            key = %key,
            path = %location.path,
            files = files.len(),
            persistent = options.persistent,
            "Asset materialized"
        );
        Ok(Stored {
            location,
            persistent: options.persistent,
            prefix,
            files,
        })
    }

    /// Copy a run-scoped artifact to `cache/` and register it.
    async fn promote(&self, key: &AssetKey, stored: &Stored) -> DomainResult<Location> {
        if let Some(location) = self.registered(key).await? {
            return Ok(location);
        }
        let prefix = format!("cache/{key}");
        let mut written = None;
        for relative in &stored.files {
            let source = Location {
                path: format!("{}/{relative}", stored.prefix),
                url: String::new(),
                is_folder: false,
            };
            let bytes = self.storage.read(&source).await?;
            written = Some(self.storage.write(&bytes, &format!("{prefix}/{relative}")).await?);
        }
        let location = self.stored_location(&prefix, stored.location.is_folder, written);
        self.registry.put(key, &location).await?;
        info!(key = %key, from = %stored.prefix, path = %location.path, "Asset promoted to persistent cache");
        Ok(location)
    }

    /// Registry entry for `key` whose artifact is still in storage.
    async fn registered(&self, key: &AssetKey) -> DomainResult<Option<Location>> {
        let Some(location) = self.registry.get(key).await? else {
            return Ok(None);
        };
        if self.storage.exists(&location).await? {
            debug!(key = %key, path = %location.path, "Reusing persisted asset");
            return Ok(Some(location));
        }
        warn!(key = %key, path = %location.path, "Registered asset missing from storage, regenerating");
        Ok(None)
    }

    /// Folders are addressed by their prefix, single files by the written file.
    fn stored_location(&self, prefix: &str, is_folder: bool, written: Option<Location>) -> Location {
        match written {
            Some(file) if !is_folder => file,
            _ => {
                let mut location = Location {
                    path: prefix.to_string(),
                    url: String::new(),
                    is_folder: true,
                };
                location.url = self.storage.url_for(&location);
                location
            }
        }
    }

    async fn ensure_external(&self, key: &AssetKey, url: &str) -> DomainResult<Location> {
        let entry = self.entry(key).await;
        entry.persistent.store(true, Ordering::Relaxed);
        entry
            .cell
            .get_or_try_init(|| async {
                entry.generating.store(true, Ordering::Release);
                let probed = self.probe.probe(url).await;
                entry.generating.store(false, Ordering::Release);
                match probed {
                    Ok(()) => {
                        debug!(key = %key, url, "External asset reachable");
                        Ok(Stored {
                            location: Location {
                                path: url.to_string(),
                                url: url.to_string(),
                                is_folder: false,
                            },
                            persistent: true,
                            prefix: url.to_string(),
                            files: Vec::new(),
                        })
                    }
                    Err(e) => Err(DomainError::AssetGenerationFailure {
                        asset: format!("external:{url}"),
                        reason: e.to_string(),
                    }),
                }
            })
            .await
            .map(|stored| stored.location.clone())
    }

    /// Location of a ready asset, from memory or the persistent registry.
    pub async fn get(&self, key: &AssetKey) -> DomainResult<Location> {
        if let Some(entry) = self.entries.lock().await.get(key).cloned() {
            if let Some(location) = entry.location() {
                return Ok(location);
            }
        }
        self.registry
            .get(key)
            .await?
            .ok_or_else(|| DomainError::AssetNotFound(key.to_string()))
    }

    pub async fn state(&self, key: &AssetKey) -> MaterializationState {
        let Some(entry) = self.entries.lock().await.get(key).cloned() else {
            return MaterializationState::Unmaterialized;
        };
        if entry.cell.initialized() {
            MaterializationState::Ready
        } else if entry.generating.load(Ordering::Acquire) {
            MaterializationState::InProgress
        } else {
            MaterializationState::Unmaterialized
        }
    }

    /// Every asset this process has seen.
    pub async fn records(&self) -> Vec<AssetRecord> {
        let entries: Vec<(AssetKey, Arc<Entry>)> = self
            .entries
            .lock()
            .await
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        let mut records = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            let state = self.state(&key).await;
            records.push(AssetRecord {
                key,
                state,
                location: entry.location(),
                persistent: entry.persistent.load(Ordering::Relaxed),
            });
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Eagerly materialize a node's named assets.
    ///
    /// Any failure is returned as [`DomainError::AssetGenerationFailure`]
    /// naming the asset, so a node with a broken asset is never scheduled.
    pub async fn prepare(
        &self,
        declarations: &BTreeMap<String, AssetDeclaration>,
    ) -> DomainResult<BTreeMap<String, Location>> {
        let materialized = try_join_all(declarations.iter().map(|(name, declaration)| async move {
            let location = self.ensure(declaration).await.map_err(|e| match e {
                DomainError::AssetGenerationFailure { reason, .. } => DomainError::AssetGenerationFailure {
                    asset: format!("{name} ({})", declaration.label()),
                    reason,
                },
                other => DomainError::AssetGenerationFailure {
                    asset: format!("{name} ({})", declaration.label()),
                    reason: other.to_string(),
                },
            })?;
            Ok::<_, DomainError>((name.clone(), location))
        }))
        .await?;
        Ok(materialized.into_iter().collect())
    }
}

/// Relative paths of every regular file under `root`, sorted.
async fn collect_files(root: &Path) -> DomainResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(root.join(&dir)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let relative = dir.join(entry.file_name());
            let kind = entry.file_type().await?;
            if kind.is_dir() {
                pending.push(relative);
            } else if kind.is_file() {
                files.push(relative);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn relative_str(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryAssetRegistry, LocalStorage};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct RefuseProbe;

    #[async_trait]
    impl ExternalProbe for RefuseProbe {
        async fn probe(&self, url: &str) -> DomainResult<()> {
            if url.contains("missing") {
                Err(DomainError::StorageError(format!("{url} unreachable")))
            } else {
                Ok(())
            }
        }
    }

    fn cache(root: &Path, registry: Arc<InMemoryAssetRegistry>) -> AssetCache {
        AssetCache::new(
            Arc::new(LocalStorage::new(root, "/static")),
            registry,
            Arc::new(RefuseProbe),
        )
    }

    #[tokio::test]
    async fn test_folder_generation_uploads_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), Arc::new(InMemoryAssetRegistry::new()));
        let key = AssetKey::from_raw("stimA");
        let location = cache
            .ensure_with(
                &key,
                &|scratch: &Path, _: &Value| -> DomainResult<()> {
                    std::fs::create_dir_all(scratch.join("parts"))?;
                    std::fs::write(scratch.join("a.wav"), b"a")?;
                    std::fs::write(scratch.join("parts/b.wav"), b"b")?;
                    Ok(())
                },
                &Value::Null,
                GenerateOptions {
                    persistent: false,
                    is_folder: true,
                },
            )
            .await
            .unwrap();
        assert!(location.is_folder);
        assert!(location.path.starts_with("runs/"));
        let stored = dir.path().join(&location.path).join("parts/b.wav");
        assert_eq!(std::fs::read(stored).unwrap(), b"b");
        assert_eq!(cache.state(&key).await, MaterializationState::Ready);
    }

    #[tokio::test]
    async fn test_failed_generation_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), Arc::new(InMemoryAssetRegistry::new()));
        let key = AssetKey::from_raw("flaky");
        let calls = AtomicUsize::new(0);
        let generator = |scratch: &Path, _: &Value| -> DomainResult<()> {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DomainError::StorageError("disk full".to_string()));
            }
            std::fs::write(scratch.join("tone.wav"), b"ok")?;
            Ok(())
        };

        let first = cache
            .ensure_with(&key, &generator, &Value::Null, GenerateOptions::default())
            .await;
        assert!(matches!(first, Err(DomainError::AssetGenerationFailure { .. })));
        assert_eq!(cache.state(&key).await, MaterializationState::Unmaterialized);

        let second = cache
            .ensure_with(&key, &generator, &Value::Null, GenerateOptions::default())
            .await
            .unwrap();
        assert!(second.path.ends_with("tone.wav"));
    }

    #[tokio::test]
    async fn test_persistent_asset_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InMemoryAssetRegistry::new());
        let source = dir.path().join("source.mp3");
        std::fs::write(&source, b"ID3").unwrap();
        let declaration = AssetDeclaration::file(source.clone()).cached();

        let first = cache(&dir.path().join("store"), registry.clone())
            .ensure(&declaration)
            .await
            .unwrap();
        assert!(first.path.starts_with("cache/file-"));

        let restarted = cache(&dir.path().join("store"), registry);
        let key = restarted.key_for(&declaration).await.unwrap();
        assert_eq!(restarted.get(&key).await.unwrap(), first);
        assert_eq!(restarted.ensure(&declaration).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_persistent_request_promotes_run_scoped_asset() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InMemoryAssetRegistry::new());
        let store = dir.path().join("store");
        let assets = cache(&store, registry.clone());
        let key = AssetKey::from_raw("stimB");
        let calls = AtomicUsize::new(0);
        let generator = |scratch: &Path, _: &Value| -> DomainResult<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(scratch.join("tone.wav"), b"tone")?;
            Ok(())
        };

        let run_scoped = assets
            .ensure_with(&key, &generator, &Value::Null, GenerateOptions::default())
            .await
            .unwrap();
        assert!(run_scoped.path.starts_with("runs/"));

        let persistent = GenerateOptions {
            persistent: true,
            is_folder: false,
        };
        let promoted = assets
            .ensure_with(&key, &generator, &Value::Null, persistent)
            .await
            .unwrap();
        assert_eq!(promoted.path, "cache/stimB/tone.wav");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(store.join(&promoted.path)).unwrap(), b"tone");
        assert_eq!(
            assets
                .ensure_with(&key, &generator, &Value::Null, GenerateOptions::default())
                .await
                .unwrap(),
            promoted
        );

        let restarted = cache(&store, registry);
        assert_eq!(restarted.get(&key).await.unwrap(), promoted);
    }

    #[tokio::test]
    async fn test_prepare_names_failing_asset() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), Arc::new(InMemoryAssetRegistry::new()))
            .with_generator(
                "iso",
                Arc::new(|scratch: &Path, params: &Value| -> DomainResult<()> {
                    std::fs::write(scratch.join("iso.json"), params.to_string())?;
                    Ok(())
                }),
            );
        let mut declarations = BTreeMap::new();
        declarations.insert(
            "rhythm".to_string(),
            AssetDeclaration::generated("iso", json!({"ioi": 800})),
        );
        let ready = cache.prepare(&declarations).await.unwrap();
        assert!(ready["rhythm"].url.starts_with("/static/runs/"));

        declarations.insert(
            "rules".to_string(),
            AssetDeclaration::external("https://example.org/missing.png"),
        );
        match cache.prepare(&declarations).await {
            Err(DomainError::AssetGenerationFailure { asset, .. }) => {
                assert!(asset.starts_with("rules"));
            }
            other => panic!("expected generation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_key_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), Arc::new(InMemoryAssetRegistry::new()));
        assert!(matches!(
            cache.get(&AssetKey::from_raw("nope")).await,
            Err(DomainError::AssetNotFound(_))
        ));
    }
}
