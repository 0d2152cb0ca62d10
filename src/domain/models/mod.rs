//! Domain models for the trialnet engine.

pub mod asset;
pub mod config;
pub mod node;
pub mod participant;
pub mod task_config;
pub mod timing;
pub mod trial;
pub mod trial_kind;

pub use asset::{AssetDeclaration, AssetKey, AssetRecord, Location, MaterializationState};
pub use config::{
    Config, DatabaseConfig, LoggingConfig, RetryConfig, SchedulerConfig, StorageConfig,
};
pub use node::{NodeSpec, NodeState, NodeView, ResponseUnit};
pub use participant::{AdmissionState, Outcome, Participant};
pub use task_config::{CountSpec, FreezeScope, TaskConfig, TaskSettings};
pub use timing::{derive_offsets, EventLogEntry};
pub use trial::{AnalysisRecord, Trial, TrialStatus};
pub use trial_kind::{StepResponse, TrialKind, UnitRating};
