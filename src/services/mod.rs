//! Engine services.
//!
//! Leaf first: the asset cache, the performance tracker and the
//! convergence manager each own one slice of episode state; the scheduler
//! assigns nodes on top of them; the episode drives the trial flow.

pub mod asset_cache;
pub mod convergence_manager;
pub mod episode;
pub mod event_bus;
pub mod performance_tracker;
pub mod retry;
pub mod scheduler;

pub use asset_cache::{AssetCache, GenerateOptions};
pub use convergence_manager::{ConvergenceManager, ResponseOutcome, TaskProgress};
pub use episode::{Episode, TrialReport};
pub use event_bus::{
    CompletionReason, EpisodeEvent, EventBus, EventPayload, EventSeverity, FinishReason,
    SequenceNumber,
};
pub use performance_tracker::{Checkpoint, PerformanceTracker, Verdict};
pub use retry::RetryPolicy;
pub use scheduler::{Assignment, ParticipantProgress, PreparedNode, Resolution, Scheduler};
