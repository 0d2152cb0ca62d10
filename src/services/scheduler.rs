//! Node pool and scheduler.
//!
//! Selects the next node for an arriving participant and owns the trial
//! lifecycle bookkeeping. Node fields that participants race on live in
//! per-node atomics: a claim is a compare-and-set on the exposure counter
//! (and, for collaborative tasks, on an exclusive claim flag), so two
//! participants can never both win the same observed state. Per-participant
//! state sits behind a per-participant `tokio::sync::Mutex`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::convergence_manager::{ConvergenceManager, TaskProgress};
use super::event_bus::{CompletionReason, FinishReason};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnalysisRecord, NodeSpec, NodeState, NodeView, Participant, SchedulerConfig, TaskSettings,
    Trial, TrialStatus,
};

/// Result of asking for a participant's next node.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// A new pending trial
    Trial(Trial),
    /// The task as a whole has converged
    TaskComplete(CompletionReason),
    /// This participant gets no further trials
    Finished(FinishReason),
}

/// A node from the snapshot with its materialized asset URLs.
#[derive(Debug, Clone)]
pub struct PreparedNode {
    pub id: Uuid,
    pub spec: NodeSpec,
    pub asset_urls: BTreeMap<String, String>,
}

impl PreparedNode {
    pub fn new(spec: NodeSpec, asset_urls: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            asset_urls,
        }
    }
}

/// Progress of one participant toward the expected trial count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProgress {
    /// Trials assigned and not discarded
    pub trial_count: u32,
    /// Trials resolved as completed or failed
    pub resolved: u32,
    pub expected: u32,
    pub max: u32,
}

impl ParticipantProgress {
    /// Fraction of the expected trials resolved, capped at 1.
    pub fn fraction(&self) -> f64 {
        if self.expected == 0 {
            return 1.0;
        }
        (f64::from(self.resolved) / f64::from(self.expected)).min(1.0)
    }
}

/// Effect of resolving a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub trial: Trial,
    /// The node hit `max_iterations` with this trial and retired
    pub node_retired: bool,
}

struct NodeSlot {
    id: Uuid,
    spec: NodeSpec,
    asset_urls: BTreeMap<String, String>,
    state: AtomicU8,
    exposure_count: AtomicU32,
    iterations: AtomicU32,
    claimed: AtomicBool,
}

impl NodeSlot {
    fn new(node: PreparedNode) -> Self {
        Self {
            id: node.id,
            spec: node.spec,
            asset_urls: node.asset_urls,
            state: AtomicU8::new(NodeState::Active.to_u8()),
            exposure_count: AtomicU32::new(0),
            iterations: AtomicU32::new(0),
            claimed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Leave `Active` for a terminal state. Returns false if already terminal.
    fn transition(&self, next: NodeState) -> bool {
        if !NodeState::Active.can_transition_to(next) {
            return false;
        }
        self.state
            .compare_exchange(
                NodeState::Active.to_u8(),
                next.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[derive(Debug, Default)]
struct ParticipantSlot {
    trial_count: u32,
    resolved: u32,
    next_position: u32,
    exposures: HashMap<Uuid, u32>,
    last_created_node: Option<Uuid>,
    pending: Option<Uuid>,
    /// The pending trial has a submission in flight
    submitting: bool,
    finished: Option<FinishReason>,
}

enum Selection {
    Chosen { index: usize, observed_exposure: u32 },
    /// Eligible nodes exist but another participant holds every one of them
    AllClaimed,
    /// No active node this participant may still see
    Exhausted,
    /// No active node at all
    NoActiveNodes,
}

pub struct Scheduler {
    settings: TaskSettings,
    nodes: Vec<NodeSlot>,
    index: HashMap<Uuid, usize>,
    participants: RwLock<HashMap<Uuid, Arc<Mutex<ParticipantSlot>>>>,
    trials: RwLock<HashMap<Uuid, Trial>>,
    convergence: Arc<ConvergenceManager>,
    lock_timeout: Duration,
    claim_attempts: u32,
    draws: AtomicU64,
}

impl Scheduler {
    pub fn new(
        settings: TaskSettings,
        nodes: Vec<PreparedNode>,
        convergence: Arc<ConvergenceManager>,
        config: &SchedulerConfig,
    ) -> Self {
        let nodes: Vec<NodeSlot> = nodes.into_iter().map(NodeSlot::new).collect();
        let index = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        Self {
            settings,
            nodes,
            index,
            participants: RwLock::new(HashMap::new()),
            trials: RwLock::new(HashMap::new()),
            convergence,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            claim_attempts: config.claim_attempts.max(1),
            draws: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    pub fn node_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    fn slot(&self, node_id: Uuid) -> DomainResult<&NodeSlot> {
        self.index
            .get(&node_id)
            .map(|&i| &self.nodes[i])
            .ok_or(DomainError::NodeNotFound(node_id))
    }

    async fn participant_slot(&self, participant_id: Uuid) -> Arc<Mutex<ParticipantSlot>> {
        if let Some(slot) = self.participants.read().await.get(&participant_id) {
            return slot.clone();
        }
        self.participants
            .write()
            .await
            .entry(participant_id)
            .or_default()
            .clone()
    }

    async fn existing_participant(
        &self,
        participant_id: Uuid,
    ) -> DomainResult<Arc<Mutex<ParticipantSlot>>> {
        self.participants
            .read()
            .await
            .get(&participant_id)
            .cloned()
            .ok_or(DomainError::ParticipantNotFound(participant_id))
    }

    async fn lock_participant(
        &self,
        participant_id: Uuid,
        slot: Arc<Mutex<ParticipantSlot>>,
    ) -> DomainResult<OwnedMutexGuard<ParticipantSlot>> {
        tokio::time::timeout(self.lock_timeout, slot.lock_owned())
            .await
            .map_err(|_| DomainError::conflict("participant", participant_id))
    }

    /// Node-state counts for the completion decision.
    pub fn task_progress(&self) -> TaskProgress {
        let mut progress = TaskProgress {
            n_nodes: self.nodes.len(),
            ..TaskProgress::default()
        };
        for node in &self.nodes {
            match node.state() {
                NodeState::Active => progress.n_active += 1,
                NodeState::Frozen => progress.n_frozen += 1,
                NodeState::Retired => progress.n_retired += 1,
            }
        }
        progress
    }

    pub fn completion(&self) -> Option<CompletionReason> {
        self.convergence.task_complete(&self.task_progress())
    }

    /// Pick a node for `participant_id` and create a pending trial for it.
    ///
    /// Completion is checked before selection. Among eligible nodes the one
    /// with the fewest exposures wins; ties are broken by the task RNG.
    #[instrument(skip(self))]
    pub async fn next_node(&self, participant_id: Uuid) -> DomainResult<Assignment> {
        let slot = self.participant_slot(participant_id).await;
        let mut participant = self.lock_participant(participant_id, slot).await?;

        if let Some(reason) = participant.finished {
            return Ok(Assignment::Finished(reason));
        }
        if let Some(trial_id) = participant.pending {
            return Err(DomainError::TrialAlreadyPending {
                participant_id,
                trial_id,
            });
        }
        if let Some(reason) = self.completion() {
            return Ok(Assignment::TaskComplete(reason));
        }
        if participant.trial_count >= self.settings.max_trials {
            participant.finished = Some(FinishReason::MaxTrialsReached);
            return Ok(Assignment::Finished(FinishReason::MaxTrialsReached));
        }

        for attempt in 0..self.claim_attempts {
            match self.select(&participant) {
                Selection::Chosen {
                    index,
                    observed_exposure,
                } => {
                    let node = &self.nodes[index];
                    if !self.claim(node, observed_exposure) {
                        debug!(node_id = %node.id, attempt, "Lost node claim race");
                        continue;
                    }
                    let trial = Trial::new(participant_id, node.id, participant.next_position);
                    participant.next_position += 1;
                    participant.trial_count += 1;
                    *participant.exposures.entry(node.id).or_insert(0) += 1;
                    participant.pending = Some(trial.id);
                    self.trials.write().await.insert(trial.id, trial.clone());
                    debug!(
                        node_id = %node.id,
                        trial_id = %trial.id,
                        position = trial.position,
                        exposure_count = observed_exposure + 1,
                        "Assigned trial"
                    );
                    return Ok(Assignment::Trial(trial));
                }
                Selection::AllClaimed => {
                    tokio::task::yield_now().await;
                }
                Selection::Exhausted => {
                    participant.finished = Some(FinishReason::NodesExhausted);
                    return Ok(Assignment::Finished(FinishReason::NodesExhausted));
                }
                Selection::NoActiveNodes => {
                    if let Some(reason) = self.completion() {
                        return Ok(Assignment::TaskComplete(reason));
                    }
                    let progress = self.task_progress();
                    let detail = format!(
                        "{} frozen, {} retired of {} nodes",
                        progress.n_frozen, progress.n_retired, progress.n_nodes
                    );
                    error!(%detail, "No active node left and the task is not complete");
                    return Err(DomainError::SchedulingExhaustion {
                        participant_id,
                        detail,
                    });
                }
            }
        }

        Err(DomainError::conflict("node claim", participant_id))
    }

    fn select(&self, participant: &ParticipantSlot) -> Selection {
        let collaborative = self.settings.is_collaborative();
        let mut any_active = false;
        let mut any_claimed = false;
        let mut best: Vec<(usize, u32)> = Vec::new();
        let mut best_exposure = u32::MAX;

        for (index, node) in self.nodes.iter().enumerate() {
            if node.state() != NodeState::Active {
                continue;
            }
            any_active = true;
            let seen = participant.exposures.get(&node.id).copied().unwrap_or(0);
            if seen >= self.settings.n_repeat_trials {
                continue;
            }
            if collaborative {
                if participant.last_created_node == Some(node.id) {
                    continue;
                }
                if node.claimed.load(Ordering::Acquire) {
                    any_claimed = true;
                    continue;
                }
            }
            let exposure = node.exposure_count.load(Ordering::Acquire);
            if exposure < best_exposure {
                best_exposure = exposure;
                best.clear();
            }
            if exposure == best_exposure {
                best.push((index, exposure));
            }
        }

        if !any_active {
            return Selection::NoActiveNodes;
        }
        if best.is_empty() {
            return if any_claimed {
                Selection::AllClaimed
            } else {
                Selection::Exhausted
            };
        }
        let (index, observed_exposure) = best[self.tie_break(best.len())];
        Selection::Chosen {
            index,
            observed_exposure,
        }
    }

    fn tie_break(&self, n: usize) -> usize {
        if n == 1 {
            return 0;
        }
        match self.settings.rng_seed {
            Some(seed) => {
                let draw = self.draws.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed.wrapping_add(draw)).random_range(0..n)
            }
            None => rand::rng().random_range(0..n),
        }
    }

    /// Compare-and-set claim on a node. Fails if another participant changed
    /// the node since it was observed.
    fn claim(&self, node: &NodeSlot, observed_exposure: u32) -> bool {
        let exclusive = self.settings.is_collaborative();
        if exclusive
            && node
                .claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return false;
        }
        let won = node.state() == NodeState::Active
            && node
                .exposure_count
                .compare_exchange(
                    observed_exposure,
                    observed_exposure + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
        if !won && exclusive {
            node.claimed.store(false, Ordering::Release);
        }
        won
    }

    /// Take ownership of a pending trial for a submission.
    ///
    /// Until the trial is resolved or the submission is released, `abandon`
    /// leaves it alone and a second submission is rejected.
    pub async fn begin_submit(&self, trial_id: Uuid) -> DomainResult<Trial> {
        let participant_id = self.trial(trial_id).await?.participant_id;
        let slot = self.existing_participant(participant_id).await?;
        let mut participant = self.lock_participant(participant_id, slot).await?;

        let trial = self.trial(trial_id).await?;
        if trial.status.is_terminal() || participant.pending != Some(trial_id) {
            return Err(DomainError::InvalidStateTransition {
                from: trial.status.as_str().to_string(),
                to: "submitted".to_string(),
                reason: format!("trial {trial_id} is already resolved"),
            });
        }
        if participant.submitting {
            return Err(DomainError::InvalidStateTransition {
                from: trial.status.as_str().to_string(),
                to: "submitted".to_string(),
                reason: format!("trial {trial_id} already has a submission in flight"),
            });
        }
        participant.submitting = true;
        Ok(trial)
    }

    /// Give up a submission that failed before resolving its trial.
    pub async fn release_submit(&self, trial_id: Uuid) -> DomainResult<()> {
        let participant_id = self.trial(trial_id).await?.participant_id;
        let slot = self.existing_participant(participant_id).await?;
        let mut participant = self.lock_participant(participant_id, slot).await?;
        if participant.pending == Some(trial_id) {
            participant.submitting = false;
        }
        Ok(())
    }

    /// Move a pending trial to a terminal status and release its node.
    ///
    /// `Completed` and `Failed` trials count as a node iteration; a node
    /// retires when its iterations reach `max_iterations`. `Discarded`
    /// trials give the participant's trial budget back and do not count.
    #[instrument(skip(self, result))]
    pub async fn resolve(
        &self,
        trial_id: Uuid,
        status: TrialStatus,
        result: Option<AnalysisRecord>,
    ) -> DomainResult<Resolution> {
        let participant_id = self.trial(trial_id).await?.participant_id;
        let slot = self.existing_participant(participant_id).await?;
        let mut participant = self.lock_participant(participant_id, slot).await?;
        self.resolve_locked(&mut participant, trial_id, status, result)
            .await
    }

    async fn resolve_locked(
        &self,
        participant: &mut ParticipantSlot,
        trial_id: Uuid,
        status: TrialStatus,
        result: Option<AnalysisRecord>,
    ) -> DomainResult<Resolution> {
        let mut trials = self.trials.write().await;
        let trial = trials
            .get_mut(&trial_id)
            .ok_or(DomainError::TrialNotFound(trial_id))?;
        if !trial.status.can_transition_to(status) {
            return Err(DomainError::InvalidStateTransition {
                from: trial.status.as_str().to_string(),
                to: status.as_str().to_string(),
                reason: format!("trial {trial_id} is no longer pending"),
            });
        }
        let node = self.slot(trial.node_id)?;

        trial.status = status;
        trial.result = result;
        trial.resolved_at = Some(Utc::now());
        if participant.pending == Some(trial_id) {
            participant.pending = None;
            participant.submitting = false;
        }

        let mut node_retired = false;
        match status {
            TrialStatus::Discarded => {
                participant.trial_count = participant.trial_count.saturating_sub(1);
            }
            TrialStatus::Completed | TrialStatus::Failed => {
                participant.resolved += 1;
                let iterations = node.iterations.fetch_add(1, Ordering::AcqRel) + 1;
                if let Some(max) = self.settings.max_iterations {
                    if iterations >= max && node.transition(NodeState::Retired) {
                        node_retired = true;
                        info!(node_id = %node.id, iterations, "Node retired at iteration bound");
                    }
                }
            }
            TrialStatus::Pending => {}
        }
        node.claimed.store(false, Ordering::Release);

        Ok(Resolution {
            trial: trial.clone(),
            node_retired,
        })
    }

    /// Resolve the participant's pending trial after a premature exit.
    ///
    /// Returns `None` when nothing is pending, or when the pending trial
    /// already has a submission in flight that will resolve it.
    pub async fn abandon(&self, participant_id: Uuid) -> DomainResult<Option<Resolution>> {
        let slot = self.existing_participant(participant_id).await?;
        let mut participant = self.lock_participant(participant_id, slot).await?;
        let Some(trial_id) = participant.pending else {
            return Ok(None);
        };
        if participant.submitting {
            debug!(participant_id = %participant_id, trial_id = %trial_id, "Abandon ignored, submission in flight");
            return Ok(None);
        }
        let (status, result) = if self.settings.fail_trials_on_premature_exit {
            (
                TrialStatus::Failed,
                Some(AnalysisRecord::failed("premature exit")),
            )
        } else {
            (TrialStatus::Discarded, None)
        };
        info!(participant_id = %participant_id, trial_id = %trial_id, status = status.as_str(), "Trial abandoned");
        self.resolve_locked(&mut participant, trial_id, status, result)
            .await
            .map(Some)
    }

    /// Stop assigning trials to a participant.
    pub async fn finish(&self, participant_id: Uuid, reason: FinishReason) -> DomainResult<()> {
        let slot = self.participant_slot(participant_id).await;
        let mut participant = self.lock_participant(participant_id, slot).await?;
        participant.finished.get_or_insert(reason);
        Ok(())
    }

    /// Record that a participant proposed units on a node.
    pub async fn note_created_units(&self, participant_id: Uuid, node_id: Uuid) -> DomainResult<()> {
        self.slot(node_id)?;
        let slot = self.existing_participant(participant_id).await?;
        self.lock_participant(participant_id, slot)
            .await?
            .last_created_node = Some(node_id);
        Ok(())
    }

    /// Freeze a node. Returns false if it was already terminal.
    pub fn mark_frozen(&self, node_id: Uuid) -> DomainResult<bool> {
        Ok(self.slot(node_id)?.transition(NodeState::Frozen))
    }

    pub async fn progress(&self, participant_id: Uuid) -> DomainResult<ParticipantProgress> {
        let slot = self.existing_participant(participant_id).await?;
        let participant = self.lock_participant(participant_id, slot).await?;
        Ok(ParticipantProgress {
            trial_count: participant.trial_count,
            resolved: participant.resolved,
            expected: self.settings.expected_trials,
            max: self.settings.max_trials,
        })
    }

    /// Scheduler-side view of a participant; outcome history is owned by
    /// the performance tracker and left empty here.
    pub async fn participant(&self, participant_id: Uuid) -> DomainResult<Participant> {
        let slot = self.existing_participant(participant_id).await?;
        let state = self.lock_participant(participant_id, slot).await?;
        let mut participant = Participant::new(participant_id);
        participant.trial_count = state.trial_count;
        participant.last_created_node = state.last_created_node;
        Ok(participant)
    }

    pub async fn pending_trial(&self, participant_id: Uuid) -> DomainResult<Option<Uuid>> {
        let slot = self.existing_participant(participant_id).await?;
        Ok(self.lock_participant(participant_id, slot).await?.pending)
    }

    pub async fn trial(&self, trial_id: Uuid) -> DomainResult<Trial> {
        self.trials
            .read()
            .await
            .get(&trial_id)
            .cloned()
            .ok_or(DomainError::TrialNotFound(trial_id))
    }

    pub async fn node_view(&self, node_id: Uuid) -> DomainResult<NodeView> {
        let node = self.slot(node_id)?;
        let units = if self.settings.is_collaborative() {
            self.convergence.units(node_id).await?
        } else {
            Vec::new()
        };
        Ok(NodeView {
            id: node.id,
            definition: node.spec.definition.clone(),
            asset_urls: node.asset_urls.clone(),
            state: node.state(),
            exposure_count: node.exposure_count.load(Ordering::Acquire),
            iterations: node.iterations.load(Ordering::Acquire),
            units,
        })
    }

    /// Read-only view of every node, in snapshot order.
    pub async fn snapshot(&self) -> DomainResult<Vec<NodeView>> {
        let mut views = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            views.push(self.node_view(node.id).await?);
        }
        Ok(views)
    }
}
