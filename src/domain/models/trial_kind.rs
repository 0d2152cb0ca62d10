//! Trial behaviours.
//!
//! Every task type exposes the same capability set (`render`, `analyze`,
//! `score`). The variant is picked from configuration; there is no trait
//! object hierarchy per task type.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::node::{NodeView, ResponseUnit};
use super::timing::{derive_offsets, EventLogEntry};
use super::trial::{AnalysisRecord, Trial};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::Analyzer;

/// Tagged trial behaviour, selected by `task.trial_kind`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialKind {
    /// Rate a stimulus on a numeric scale.
    #[default]
    Rating,
    /// Record tapping along to a stimulus; the analyzer decides pass/fail.
    Tapping,
    /// Collaborative tagging: rate existing tags and propose new ones.
    StepTag,
    /// Press a button at interesting moments; offsets come from the event log.
    TimedButton,
    /// Forced choice with a known correct answer in the node definition.
    Choice,
}

/// A collaborative response after validation at the trial boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    /// Ratings of existing units, keyed by unit text.
    #[serde(default)]
    pub ratings: Vec<UnitRating>,
    /// Newly proposed units.
    #[serde(default)]
    pub proposals: Vec<String>,
}

/// One rating of an existing response unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRating {
    pub unit: String,
    pub rating: f64,
}

impl TrialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rating => "rating",
            Self::Tapping => "tapping",
            Self::StepTag => "step_tag",
            Self::TimedButton => "timed_button",
            Self::Choice => "choice",
        }
    }

    /// Whether nodes of this kind accumulate response units and freeze.
    pub fn is_collaborative(&self) -> bool {
        matches!(self, Self::StepTag)
    }

    /// Opaque render descriptor handed to the page layer.
    pub fn render(&self, trial: &Trial, node: &NodeView) -> Value {
        let mut page = json!({
            "page": self.as_str(),
            "trial_id": trial.id,
            "position": trial.position,
            "definition": node.definition,
            "assets": node.asset_urls,
        });
        if self.is_collaborative() {
            let (frozen, open): (Vec<_>, Vec<_>) = node.units.iter().partition(|u| u.frozen);
            page["frozen_units"] = json!(frozen.iter().map(|u| &u.text).collect::<Vec<_>>());
            page["open_units"] = json!(open.iter().map(|u| &u.text).collect::<Vec<_>>());
        }
        page
    }

    /// Validate a raw response and hand it to the analyzer.
    ///
    /// Malformed responses are rejected here so that nothing downstream
    /// (in particular the convergence aggregate) ever sees them.
    pub async fn analyze(
        &self,
        analyzer: &dyn Analyzer,
        response: &Value,
        node: &NodeView,
    ) -> DomainResult<AnalysisRecord> {
        let normalized = self.normalize_response(response)?;
        let mut record = analyzer.analyze(&normalized, node).await?;
        if record.score.is_none() {
            record.score = self.score(&normalized, &node.definition);
        }
        if self.is_collaborative() && record.normalized_response.is_none() {
            record.normalized_response = Some(normalized);
        }
        Ok(record)
    }

    /// Numeric score of an answer, where the kind defines one.
    pub fn score(&self, answer: &Value, definition: &Value) -> Option<f64> {
        match self {
            Self::Rating => answer.get("rating").and_then(Value::as_f64).or_else(|| answer.as_f64()),
            Self::Choice => {
                let correct = definition.get("correct")?;
                let given = answer.get("choice").unwrap_or(answer);
                Some(if given == correct { 1.0 } else { 0.0 })
            }
            Self::TimedButton => answer
                .get("offsets")
                .and_then(Value::as_array)
                .map(|offsets| offsets.len() as f64),
            Self::Tapping | Self::StepTag => None,
        }
    }

    fn normalize_response(&self, response: &Value) -> DomainResult<Value> {
        match self {
            Self::StepTag => {
                let mut parsed: StepResponse = serde_json::from_value(response.clone())
                    .map_err(|e| DomainError::ValidationFailed(format!("malformed step response: {e}")))?;
                parsed.proposals = parsed
                    .proposals
                    .iter()
                    .map(|p| p.trim().to_string())
                    .collect();
                if parsed.proposals.iter().any(String::is_empty) {
                    return Err(DomainError::ValidationFailed(
                        "empty unit proposal".to_string(),
                    ));
                }
                if let Some(bad) = parsed.ratings.iter().find(|r| !r.rating.is_finite()) {
                    return Err(DomainError::ValidationFailed(format!(
                        "non-finite rating for unit '{}'",
                        bad.unit
                    )));
                }
                let mut rated = HashSet::new();
                if let Some(repeat) = parsed
                    .ratings
                    .iter()
                    .find(|r| !rated.insert(ResponseUnit::normalized(&r.unit)))
                {
                    return Err(DomainError::ValidationFailed(format!(
                        "unit '{}' rated more than once",
                        repeat.unit.trim()
                    )));
                }
                Ok(serde_json::to_value(parsed)?)
            }
            Self::TimedButton => {
                let log: Vec<EventLogEntry> = serde_json::from_value(
                    response.get("event_log").cloned().unwrap_or(Value::Null),
                )
                .map_err(|e| DomainError::ValidationFailed(format!("malformed event log: {e}")))?;
                let offsets = derive_offsets(&log)?;
                Ok(json!({ "offsets": offsets }))
            }
            Self::Rating | Self::Tapping | Self::Choice => Ok(response.clone()),
        }
    }
}
