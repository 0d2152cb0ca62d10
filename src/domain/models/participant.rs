//! Participant domain model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a participant may keep receiving trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    #[default]
    Active,
    /// Terminal for the rest of the episode
    Excluded,
}

/// Outcome of one counted trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
}

/// Snapshot of a participant, assembled from the scheduler and tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub trial_count: u32,
    pub outcome_history: Vec<Outcome>,
    pub admission_state: AdmissionState,
    /// Node this participant most recently proposed units for
    pub last_created_node: Option<Uuid>,
}

impl Participant {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            trial_count: 0,
            outcome_history: Vec::new(),
            admission_state: AdmissionState::Active,
            last_created_node: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.admission_state == AdmissionState::Active
    }

    /// Fraction of passed outcomes; `None` for an empty history.
    pub fn pass_rate(&self) -> Option<f64> {
        pass_rate(&self.outcome_history)
    }
}

pub(crate) fn pass_rate(history: &[Outcome]) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let passed = history.iter().filter(|o| **o == Outcome::Passed).count();
    Some(passed as f64 / history.len() as f64)
}
