//! trialnet - trial distribution and convergence engine
//!
//! trialnet hands stimulus nodes to concurrent participants as trials,
//! scores their responses through an external analyzer, excludes
//! participants whose pass rate drops too low, and, for collaborative
//! tasks, aggregates crowd-contributed units until nodes converge.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): scheduling, convergence, performance tracking, asset caching
//! - **Adapters** (`adapters`): SQLite registry, local storage, node sources, analyzers
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use trialnet::services::{Assignment, Episode};
//!
//! let episode = Episode::initialize(&config, &source, &assets, analyzer).await?;
//! while let Assignment::Trial(trial) = episode.next_trial(participant).await? {
//!     episode.submit(trial.id, &response).await?;
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AnalysisRecord, AssetDeclaration, AssetKey, Config, Location, NodeSpec, NodeState, NodeView,
    Participant, TaskConfig, TaskSettings, Trial, TrialKind, TrialStatus,
};
pub use domain::ports::{Analyzer, AssetGenerator, AssetRegistry, NodeSource, Storage};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AssetCache, Assignment, ConvergenceManager, Episode, EventBus, PerformanceTracker, Scheduler,
};
