use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisRecord, NodeView};

/// External scoring system that evaluates one participant response.
///
/// May take seconds (audio onset detection and the like). The engine holds
/// no locks while awaiting it and never looks inside `diagnostics`.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, response: &Value, node: &NodeView) -> DomainResult<AnalysisRecord>;
}

/// Analyzer for tasks where a well-formed response cannot fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllAnalyzer;

#[async_trait]
impl Analyzer for AcceptAllAnalyzer {
    async fn analyze(&self, _response: &Value, _node: &NodeView) -> DomainResult<AnalysisRecord> {
        Ok(AnalysisRecord::passed())
    }
}
