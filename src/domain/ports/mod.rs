//! Port trait definitions (Hexagonal Architecture)
//!
//! Contracts for the external collaborators of the engine:
//! - NodeSource: produces the node snapshot
//! - Analyzer: scores participant responses
//! - Storage: stores materialized artifacts
//! - AssetRegistry: persists asset key mappings
//! - ExternalProbe: validates externally hosted artifacts
//! - AssetGenerator: produces derived stimuli

pub mod analyzer;
pub mod asset_generator;
pub mod asset_registry;
pub mod external_probe;
pub mod node_source;
pub mod storage;

pub use analyzer::{AcceptAllAnalyzer, Analyzer};
pub use asset_generator::AssetGenerator;
pub use asset_registry::AssetRegistry;
pub use external_probe::ExternalProbe;
pub use node_source::NodeSource;
pub use storage::Storage;
