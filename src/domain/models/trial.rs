//! Trial domain model.
//!
//! A trial is one participant's interaction with one node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Assigned, waiting for the response and its analysis
    #[default]
    Pending,
    /// Analyzed and accepted
    Completed,
    /// Analyzer failure or counted premature exit
    Failed,
    /// Abandoned and not counted
    Discarded,
}

impl TrialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Discarded => "discarded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(self, Self::Pending) && next.is_terminal()
    }
}

/// Structured analyzer output. `diagnostics` is never inspected by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub diagnostics: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Response after validation at the trial boundary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_response: Option<Value>,
}

impl AnalysisRecord {
    pub fn passed() -> Self {
        Self::default()
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            failed: true,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Value) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// One participant's interaction with one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub participant_id: Uuid,
    pub node_id: Uuid,
    /// Zero-based sequence index for this participant
    pub position: u32,
    pub status: TrialStatus,
    pub result: Option<AnalysisRecord>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Trial {
    pub fn new(participant_id: Uuid, node_id: Uuid, position: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id,
            node_id,
            position,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}
