//! Per-participant performance ledger and admission decisions.
//!
//! Every counted trial appends a pass/fail [`Outcome`] to the participant's
//! history. [`PerformanceTracker::check`] compares the pass rate against
//! the configured threshold, either after every trial or only at the end
//! checkpoint. Exclusion is terminal.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::participant::pass_rate;
use crate::domain::models::{AdmissionState, AnalysisRecord, Outcome, TaskSettings};

/// When a performance check is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// After any counted trial
    AfterTrial,
    /// After the participant's last trial
    EndOfTask,
}

/// Result of a performance check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    Exclude { pass_rate: f64, threshold: f64 },
}

#[derive(Debug, Default)]
struct Ledger {
    history: Vec<Outcome>,
    admission: AdmissionState,
}

/// Tracks participant outcomes and decides exclusion.
#[derive(Clone)]
pub struct PerformanceTracker {
    threshold: Option<f64>,
    check_at_end: bool,
    ledgers: Arc<RwLock<HashMap<Uuid, Ledger>>>,
}

impl PerformanceTracker {
    pub fn new(settings: &TaskSettings) -> Self {
        Self {
            threshold: settings.performance_threshold,
            check_at_end: settings.check_performance_at_end,
            ledgers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append the outcome of a counted trial.
    pub async fn record_outcome(
        &self,
        participant_id: Uuid,
        result: &AnalysisRecord,
    ) -> DomainResult<Outcome> {
        let outcome = if result.failed {
            Outcome::Failed
        } else {
            Outcome::Passed
        };
        let mut ledgers = self.ledgers.write().await;
        let ledger = ledgers.entry(participant_id).or_default();
        if ledger.admission == AdmissionState::Excluded {
            return Err(DomainError::InvalidStateTransition {
                from: "excluded".to_string(),
                to: "recording".to_string(),
                reason: format!("participant {participant_id} is excluded"),
            });
        }
        ledger.history.push(outcome);
        tracing::debug!(
            participant_id = %participant_id,
            outcome = ?outcome,
            total = ledger.history.len(),
            "Recorded trial outcome"
        );
        Ok(outcome)
    }

    /// Evaluate the windowed performance check at a checkpoint.
    ///
    /// With `check_performance_at_end` only [`Checkpoint::EndOfTask`] is
    /// evaluated. An empty history never excludes.
    pub async fn check(&self, participant_id: Uuid, checkpoint: Checkpoint) -> Verdict {
        let mut ledgers = self.ledgers.write().await;
        let ledger = ledgers.entry(participant_id).or_default();
        let rate = pass_rate(&ledger.history);

        if ledger.admission == AdmissionState::Excluded {
            return Verdict::Exclude {
                pass_rate: rate.unwrap_or(0.0),
                threshold: self.threshold.unwrap_or(0.0),
            };
        }
        let Some(threshold) = self.threshold else {
            return Verdict::Continue;
        };
        if self.check_at_end && checkpoint != Checkpoint::EndOfTask {
            return Verdict::Continue;
        }
        let Some(rate) = rate else {
            return Verdict::Continue;
        };

        if rate <= threshold {
            ledger.admission = AdmissionState::Excluded;
            tracing::warn!(
                participant_id = %participant_id,
                pass_rate = rate,
                threshold,
                trials = ledger.history.len(),
                "Participant excluded by performance check"
            );
            return Verdict::Exclude {
                pass_rate: rate,
                threshold,
            };
        }
        Verdict::Continue
    }

    pub async fn admission(&self, participant_id: Uuid) -> AdmissionState {
        self.ledgers
            .read()
            .await
            .get(&participant_id)
            .map(|l| l.admission)
            .unwrap_or_default()
    }

    pub async fn history(&self, participant_id: Uuid) -> Vec<Outcome> {
        self.ledgers
            .read()
            .await
            .get(&participant_id)
            .map(|l| l.history.clone())
            .unwrap_or_default()
    }
}
