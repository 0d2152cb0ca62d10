//! Episode event bus.
//!
//! Broadcast-based stream of episode events with sequence numbering.
//! Participant-level failures (exclusion, failed trials) surface here
//! rather than as errors that would touch other participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::TrialStatus;

/// Monotonically increasing sequence number assigned by [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Why a participant stopped receiving trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Failed the performance check
    Excluded,
    /// Reached `max_trials_per_participant`
    MaxTrialsReached,
    /// Has already seen every node it may still be assigned
    NodesExhausted,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excluded => "excluded",
            Self::MaxTrialsReached => "max_trials_reached",
            Self::NodesExhausted => "nodes_exhausted",
        }
    }
}

/// Why the task as a whole completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// `complete_on_n_frozen` nodes froze
    FrozenTarget,
    /// Every node froze or ran out of iterations
    IterationsExhausted,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrozenTarget => "frozen_target",
            Self::IterationsExhausted => "iterations_exhausted",
        }
    }
}

/// Event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeEvent {
    pub id: Uuid,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub participant_id: Option<Uuid>,
    pub node_id: Option<Uuid>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    EpisodeStarted {
        n_nodes: usize,
        n_assets: usize,
    },
    TrialAssigned {
        trial_id: Uuid,
        position: u32,
    },
    TrialResolved {
        trial_id: Uuid,
        status: TrialStatus,
        reason: Option<String>,
    },
    TrialAbandoned {
        trial_id: Uuid,
        status: TrialStatus,
    },
    UnitsCreated {
        count: usize,
    },
    NodeFrozen,
    NodeRetired {
        iterations: u32,
    },
    ParticipantExcluded {
        pass_rate: f64,
        threshold: f64,
    },
    ParticipantFinished {
        reason: FinishReason,
    },
    TaskCompleted {
        reason: CompletionReason,
    },
    SchedulingExhausted {
        detail: String,
    },
}

impl EventPayload {
    fn default_severity(&self) -> EventSeverity {
        match self {
            Self::TrialAssigned { .. } | Self::UnitsCreated { .. } => EventSeverity::Debug,
            Self::TrialResolved {
                status: TrialStatus::Failed,
                ..
            }
            | Self::TrialAbandoned { .. }
            | Self::ParticipantExcluded { .. } => EventSeverity::Warning,
            Self::SchedulingExhausted { .. } => EventSeverity::Error,
            _ => EventSeverity::Info,
        }
    }
}

/// Central bus broadcasting episode events to any number of consumers.
pub struct EventBus {
    sender: broadcast::Sender<EpisodeEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event; returns the sequence number it was assigned.
    pub fn publish(
        &self,
        participant_id: Option<Uuid>,
        node_id: Option<Uuid>,
        payload: EventPayload,
    ) -> SequenceNumber {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));
        let event = EpisodeEvent {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            severity: payload.default_severity(),
            participant_id,
            node_id,
            payload,
        };
        // No subscribers is fine.
        let _ = self.sender.send(event);
        sequence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EpisodeEvent> {
        self.sender.subscribe()
    }

    /// Number of events published so far.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_and_delivery() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let participant = Uuid::new_v4();
        bus.publish(Some(participant), None, EventPayload::NodeFrozen);
        bus.publish(
            Some(participant),
            None,
            EventPayload::ParticipantExcluded {
                pass_rate: 0.25,
                threshold: 0.5,
            },
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, SequenceNumber(0));
        assert_eq!(second.sequence, SequenceNumber(1));
        assert_eq!(second.severity, EventSeverity::Warning);
        assert_eq!(bus.current_sequence(), SequenceNumber(2));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(
            bus.publish(None, None, EventPayload::NodeFrozen),
            SequenceNumber(0)
        );
    }

    #[test]
    fn test_payload_serde_tagging() {
        let payload = EventPayload::ParticipantFinished {
            reason: FinishReason::MaxTrialsReached,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "ParticipantFinished");
        assert_eq!(json["data"]["reason"], "max_trials_reached");
    }
}
