use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::NodeSpec;

/// Produces the node declarations for an episode.
///
/// Evaluated exactly once at initialization; the result is kept as an
/// immutable snapshot for the lifetime of the episode. Implementations may
/// be expensive (directory scans, pairwise combinations) but must be
/// deterministic for a given environment.
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn load(&self) -> DomainResult<Vec<NodeSpec>>;
}
