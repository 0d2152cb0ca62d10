//! Adapters implementing the domain ports.

pub mod analyzers;
pub mod http_probe;
pub mod local_storage;
pub mod memory_registry;
pub mod node_sources;
pub mod sqlite;

pub use analyzers::ScoreThresholdAnalyzer;
pub use http_probe::HttpProbe;
pub use local_storage::LocalStorage;
pub use memory_registry::InMemoryAssetRegistry;
pub use node_sources::{DirectoryNodeSource, PairwiseNodeSource, StaticNodeSource};
pub use sqlite::SqliteAssetRegistry;
