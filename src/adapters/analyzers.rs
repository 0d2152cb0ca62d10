//! Analyzer implementations.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisRecord, NodeView};
use crate::domain::ports::Analyzer;

/// Fails a response whose numeric `field` is below a minimum.
///
/// The minimum can be overridden per node through a definition entry of
/// the same name prefixed with `min_` (e.g. `min_num_detected_taps`).
#[derive(Debug, Clone)]
pub struct ScoreThresholdAnalyzer {
    field: String,
    minimum: f64,
}

impl ScoreThresholdAnalyzer {
    pub fn new(field: impl Into<String>, minimum: f64) -> Self {
        Self {
            field: field.into(),
            minimum,
        }
    }
}

#[async_trait]
impl Analyzer for ScoreThresholdAnalyzer {
    async fn analyze(&self, response: &Value, node: &NodeView) -> DomainResult<AnalysisRecord> {
        let minimum = node
            .definition
            .get(format!("min_{}", self.field))
            .and_then(Value::as_f64)
            .unwrap_or(self.minimum);
        let Some(value) = response.get(&self.field).and_then(Value::as_f64) else {
            return Ok(AnalysisRecord::failed(format!("missing numeric '{}'", self.field)));
        };

        let diagnostics = json!({ &self.field: value, "minimum": minimum });
        let record = if value >= minimum {
            AnalysisRecord::passed()
        } else {
            AnalysisRecord::failed(format!("{} {value} below minimum {minimum}", self.field))
        };
        Ok(AnalysisRecord {
            score: Some(value),
            ..record.with_diagnostics(diagnostics)
        })
    }
}
