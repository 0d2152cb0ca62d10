//! Per-node response aggregation and freeze logic.
//!
//! Each collaborative node owns an ordered list of [`ResponseUnit`]s behind
//! its own `tokio::sync::Mutex`. A response's read-modify-write happens
//! entirely under that lock, so concurrent participants rating the same
//! node never lose updates. Lock acquisition is bounded by a timeout and a
//! timeout surfaces as [`DomainError::ConcurrencyConflict`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::event_bus::CompletionReason;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FreezeScope, ResponseUnit, StepResponse, TaskSettings};

/// What one response changed on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseOutcome {
    /// Ratings applied to open units
    pub rated_units: usize,
    /// Ratings addressed to frozen or unknown units
    pub ignored_ratings: usize,
    /// Units newly created from proposals
    pub created_units: usize,
    /// Units that froze because of this response
    pub units_frozen_now: usize,
    /// The node transitioned to frozen because of this response
    pub node_frozen_now: bool,
}

/// Node-state counts used for the completion decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub n_nodes: usize,
    pub n_active: usize,
    pub n_frozen: usize,
    pub n_retired: usize,
}

#[derive(Debug, Default)]
struct NodeAggregate {
    units: Vec<ResponseUnit>,
    frozen: bool,
}

impl NodeAggregate {
    fn satisfies(&self, scope: FreezeScope) -> bool {
        match scope {
            FreezeScope::AnyUnit => self.units.iter().any(|u| u.frozen),
            FreezeScope::AllUnits => !self.units.is_empty() && self.units.iter().all(|u| u.frozen),
        }
    }
}

pub struct ConvergenceManager {
    freeze_on_n_ratings: u32,
    freeze_on_mean_rating: f64,
    freeze_scope: FreezeScope,
    complete_on_n_frozen: Option<u32>,
    max_iterations: Option<u32>,
    lock_timeout: Duration,
    nodes: HashMap<Uuid, Arc<Mutex<NodeAggregate>>>,
}

impl ConvergenceManager {
    pub fn new(
        settings: &TaskSettings,
        node_ids: impl IntoIterator<Item = Uuid>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            freeze_on_n_ratings: settings.freeze_on_n_ratings,
            freeze_on_mean_rating: settings.freeze_on_mean_rating,
            freeze_scope: settings.freeze_scope,
            complete_on_n_frozen: settings.complete_on_n_frozen,
            max_iterations: settings.max_iterations,
            lock_timeout,
            nodes: node_ids
                .into_iter()
                .map(|id| (id, Arc::new(Mutex::new(NodeAggregate::default()))))
                .collect(),
        }
    }

    async fn lock(&self, node_id: Uuid) -> DomainResult<MutexGuard<'_, NodeAggregate>> {
        let aggregate = self
            .nodes
            .get(&node_id)
            .ok_or(DomainError::NodeNotFound(node_id))?;
        tokio::time::timeout(self.lock_timeout, aggregate.lock())
            .await
            .map_err(|_| {
                tracing::warn!(node_id = %node_id, "Node aggregate lock timed out");
                DomainError::conflict("node", node_id)
            })
    }

    /// Apply a validated collaborative response to a node.
    ///
    /// Ratings are applied first; the node's freeze status is then
    /// re-evaluated, and proposals are only accepted while it stays open.
    pub async fn record_response(
        &self,
        node_id: Uuid,
        author: Uuid,
        response: &StepResponse,
    ) -> DomainResult<ResponseOutcome> {
        let mut node = self.lock(node_id).await?;
        let mut outcome = ResponseOutcome::default();

        // One rating per unit per response.
        let mut rated = HashSet::new();
        for rating in &response.ratings {
            let key = ResponseUnit::normalized(&rating.unit);
            if !rated.insert(key.clone()) {
                outcome.ignored_ratings += 1;
                continue;
            }
            match node
                .units
                .iter_mut()
                .find(|u| ResponseUnit::normalized(&u.text) == key && !u.frozen)
            {
                Some(unit) => {
                    outcome.rated_units += 1;
                    if unit.rate(rating.rating, self.freeze_on_n_ratings, self.freeze_on_mean_rating) {
                        outcome.units_frozen_now += 1;
                        tracing::debug!(
                            node_id = %node_id,
                            unit = %unit.text,
                            mean_rating = unit.mean_rating,
                            "Response unit frozen"
                        );
                    }
                }
                None => outcome.ignored_ratings += 1,
            }
        }

        if !node.frozen && node.satisfies(self.freeze_scope) {
            node.frozen = true;
            outcome.node_frozen_now = true;
            tracing::info!(node_id = %node_id, units = node.units.len(), "Node frozen");
        }

        if !node.frozen {
            let mut seen: HashSet<String> = node
                .units
                .iter()
                .map(|u| ResponseUnit::normalized(&u.text))
                .collect();
            for proposal in &response.proposals {
                let text = proposal.trim();
                if text.is_empty() || !seen.insert(ResponseUnit::normalized(text)) {
                    continue;
                }
                node.units.push(ResponseUnit::new(text, author));
                outcome.created_units += 1;
            }
        }

        Ok(outcome)
    }

    pub async fn is_frozen(&self, node_id: Uuid) -> DomainResult<bool> {
        Ok(self.lock(node_id).await?.frozen)
    }

    /// Units of a node in creation order.
    pub async fn units(&self, node_id: Uuid) -> DomainResult<Vec<ResponseUnit>> {
        Ok(self.lock(node_id).await?.units.clone())
    }

    /// Whether the task as a whole has converged.
    pub fn task_complete(&self, progress: &TaskProgress) -> Option<CompletionReason> {
        if let Some(target) = self.complete_on_n_frozen {
            if progress.n_frozen >= target as usize {
                return Some(CompletionReason::FrozenTarget);
            }
        }
        if self.max_iterations.is_some() && progress.n_nodes > 0 && progress.n_active == 0 {
            return Some(CompletionReason::IterationsExhausted);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CountSpec, TaskConfig, TrialKind, UnitRating};

    fn settings(scope: FreezeScope) -> TaskSettings {
        TaskConfig {
            trial_kind: TrialKind::StepTag,
            freeze_on_n_ratings: 2,
            freeze_on_mean_rating: 4.0,
            freeze_scope: scope,
            complete_on_n_frozen: Some(CountSpec::Fixed(2)),
            max_iterations: Some(CountSpec::Fixed(5)),
            ..Default::default()
        }
        .resolve(3)
        .unwrap()
    }

    fn propose(tags: &[&str]) -> StepResponse {
        StepResponse {
            ratings: vec![],
            proposals: tags.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    fn rate(tag: &str, rating: f64) -> StepResponse {
        StepResponse {
            ratings: vec![UnitRating {
                unit: tag.to_string(),
                rating,
            }],
            proposals: vec![],
        }
    }

    fn manager(scope: FreezeScope) -> (ConvergenceManager, Uuid) {
        let node = Uuid::new_v4();
        let manager = ConvergenceManager::new(&settings(scope), [node], Duration::from_millis(100));
        (manager, node)
    }

    #[tokio::test]
    async fn test_duplicate_proposals_ignored() {
        let (manager, node) = manager(FreezeScope::AnyUnit);
        let author = Uuid::new_v4();
        let outcome = manager
            .record_response(node, author, &propose(&["Happy", " happy ", "bright"]))
            .await
            .unwrap();
        assert_eq!(outcome.created_units, 2);
        let again = manager
            .record_response(node, author, &propose(&["HAPPY"]))
            .await
            .unwrap();
        assert_eq!(again.created_units, 0);
        assert_eq!(manager.units(node).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_any_unit_scope_freezes_node() {
        let (manager, node) = manager(FreezeScope::AnyUnit);
        let author = Uuid::new_v4();
        manager.record_response(node, author, &propose(&["happy", "sad"])).await.unwrap();
        manager.record_response(node, author, &rate("happy", 5.0)).await.unwrap();
        let outcome = manager.record_response(node, author, &rate("happy", 4.0)).await.unwrap();
        assert!(outcome.node_frozen_now);
        assert!(manager.is_frozen(node).await.unwrap());

        let late = manager
            .record_response(node, author, &propose(&["calm"]))
            .await
            .unwrap();
        assert_eq!(late.created_units, 0);
    }

    #[tokio::test]
    async fn test_all_units_scope_waits_for_every_unit() {
        let (manager, node) = manager(FreezeScope::AllUnits);
        let author = Uuid::new_v4();
        manager.record_response(node, author, &propose(&["happy", "sad"])).await.unwrap();
        for _ in 0..2 {
            manager.record_response(node, author, &rate("happy", 5.0)).await.unwrap();
        }
        assert!(!manager.is_frozen(node).await.unwrap());
        for _ in 0..2 {
            manager.record_response(node, author, &rate("sad", 5.0)).await.unwrap();
        }
        assert!(manager.is_frozen(node).await.unwrap());
    }

    #[tokio::test]
    async fn test_frozen_unit_ignores_ratings() {
        let (manager, node) = manager(FreezeScope::AllUnits);
        let author = Uuid::new_v4();
        manager.record_response(node, author, &propose(&["happy", "sad"])).await.unwrap();
        manager.record_response(node, author, &rate("happy", 5.0)).await.unwrap();
        manager.record_response(node, author, &rate("happy", 5.0)).await.unwrap();
        let outcome = manager.record_response(node, author, &rate("happy", 1.0)).await.unwrap();
        assert_eq!(outcome.ignored_ratings, 1);
        let units = manager.units(node).await.unwrap();
        assert!(units[0].frozen);
        assert_eq!(units[0].rating_count, 2);
    }

    #[tokio::test]
    async fn test_single_response_rates_a_unit_once() {
        let node = Uuid::new_v4();
        let config = TaskConfig {
            trial_kind: TrialKind::StepTag,
            freeze_on_n_ratings: 3,
            freeze_on_mean_rating: 5.0,
            ..Default::default()
        };
        let manager = ConvergenceManager::new(&config.resolve(1).unwrap(), [node], Duration::from_millis(100));
        manager
            .record_response(node, Uuid::new_v4(), &propose(&["happy"]))
            .await
            .unwrap();

        let response = StepResponse {
            ratings: ["happy", "happy", "HAPPY "]
                .iter()
                .map(|unit| UnitRating {
                    unit: (*unit).to_string(),
                    rating: 5.0,
                })
                .collect(),
            proposals: vec![],
        };
        let outcome = manager
            .record_response(node, Uuid::new_v4(), &response)
            .await
            .unwrap();
        assert_eq!(outcome.rated_units, 1);
        assert_eq!(outcome.ignored_ratings, 2);
        assert!(!outcome.node_frozen_now);
        assert!(!manager.is_frozen(node).await.unwrap());
        assert_eq!(manager.units(node).await.unwrap()[0].rating_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let (manager, _) = manager(FreezeScope::AnyUnit);
        let missing = Uuid::new_v4();
        assert!(matches!(
            manager.is_frozen(missing).await,
            Err(DomainError::NodeNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_concurrent_ratings_do_not_lose_updates() {
        let node = Uuid::new_v4();
        let config = TaskConfig {
            trial_kind: TrialKind::StepTag,
            freeze_on_n_ratings: 1000,
            ..Default::default()
        };
        let manager = Arc::new(ConvergenceManager::new(
            &config.resolve(1).unwrap(),
            [node],
            Duration::from_secs(5),
        ));
        manager
            .record_response(node, Uuid::new_v4(), &propose(&["loud"]))
            .await
            .unwrap();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .record_response(node, Uuid::new_v4(), &rate("loud", f64::from(i % 4)))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let units = manager.units(node).await.unwrap();
        assert_eq!(units[0].rating_count, 32);
        assert!((units[0].mean_rating - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_task_complete_branches() {
        let (manager, _) = manager(FreezeScope::AnyUnit);
        let progress = |active, frozen, retired| TaskProgress {
            n_nodes: 3,
            n_active: active,
            n_frozen: frozen,
            n_retired: retired,
        };
        assert_eq!(manager.task_complete(&progress(2, 1, 0)), None);
        assert_eq!(
            manager.task_complete(&progress(1, 2, 0)),
            Some(CompletionReason::FrozenTarget)
        );
        assert_eq!(
            manager.task_complete(&progress(0, 1, 2)),
            Some(CompletionReason::IterationsExhausted)
        );
    }
}
