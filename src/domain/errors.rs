//! Domain errors for the trialnet engine.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur while running an episode.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Participant {participant_id} excluded: pass rate {pass_rate:.2} at or below threshold {threshold:.2}")]
    ParticipantExcluded {
        participant_id: Uuid,
        pass_rate: f64,
        threshold: f64,
    },

    #[error("Trial {trial_id} analysis failed: {reason}")]
    TrialAnalysisFailure { trial_id: Uuid, reason: String },

    #[error("Asset generation failed for {asset}: {reason}")]
    AssetGenerationFailure { asset: String, reason: String },

    #[error("Scheduling exhausted: no eligible node for participant {participant_id} and completion criteria unmet ({detail})")]
    SchedulingExhaustion { participant_id: Uuid, detail: String },

    #[error("Concurrency conflict: {entity} {id} was contended")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(Uuid),

    #[error("Trial not found: {0}")]
    TrialNotFound(Uuid),

    #[error("Participant {participant_id} already holds pending trial {trial_id}")]
    TrialAlreadyPending { participant_id: Uuid, trial_id: Uuid },

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Timing derivation failed: {0}")]
    TimingError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Whether the caller should retry the operation after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Whether the error aborts the whole episode rather than one participant.
    pub fn is_episode_fatal(&self) -> bool {
        matches!(
            self,
            Self::AssetGenerationFailure { .. } | Self::SchedulingExhaustion { .. }
        )
    }

    pub(crate) fn conflict(entity: &str, id: impl ToString) -> Self {
        Self::ConcurrencyConflict {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::StorageError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = DomainError::conflict("node", Uuid::nil());
        assert!(err.is_transient());
        assert!(!err.is_episode_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        let err = DomainError::AssetGenerationFailure {
            asset: "stimulus".to_string(),
            reason: "boom".to_string(),
        };
        assert!(err.is_episode_fatal());

        let err = DomainError::ParticipantExcluded {
            participant_id: Uuid::nil(),
            pass_rate: 0.3,
            threshold: 0.6,
        };
        assert!(!err.is_episode_fatal());
        assert!(err.to_string().contains("0.30"));
    }
}
