//! Episode orchestration.
//!
//! An [`Episode`] owns one run of a task: it snapshots the node source,
//! materializes every asset up front, and then drives the per-trial flow
//! (assign, analyze, record outcome, update convergence, resolve). Each
//! component commits its own state; completion is re-evaluated on the next
//! assignment. Participant-level failures are published on the
//! [`EventBus`] and never affect other participants.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::asset_cache::AssetCache;
use super::convergence_manager::{ConvergenceManager, ResponseOutcome};
use super::event_bus::{CompletionReason, EpisodeEvent, EventBus, EventPayload, FinishReason};
use super::performance_tracker::{Checkpoint, PerformanceTracker, Verdict};
use super::retry::RetryPolicy;
use super::scheduler::{Assignment, ParticipantProgress, PreparedNode, Resolution, Scheduler};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AdmissionState, AnalysisRecord, Config, NodeView, Participant, StepResponse, TaskSettings,
    Trial, TrialStatus,
};
use crate::domain::ports::{Analyzer, NodeSource};

/// What happened to a submitted trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialReport {
    pub trial: Trial,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence: Option<ResponseOutcome>,
    pub node_retired: bool,
}

pub struct Episode {
    settings: TaskSettings,
    scheduler: Arc<Scheduler>,
    convergence: Arc<ConvergenceManager>,
    tracker: PerformanceTracker,
    analyzer: Arc<dyn Analyzer>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
}

impl Episode {
    /// Load the node snapshot, resolve the task and materialize every asset.
    ///
    /// Any asset failure aborts initialization, so no participant is ever
    /// handed a node whose stimulus cannot be served.
    #[instrument(skip_all)]
    pub async fn initialize(
        config: &Config,
        source: &dyn NodeSource,
        assets: &AssetCache,
        analyzer: Arc<dyn Analyzer>,
    ) -> DomainResult<Self> {
        let specs = source.load().await?;
        if specs.is_empty() {
            return Err(DomainError::ValidationFailed(
                "node source produced no nodes".to_string(),
            ));
        }
        let settings = config.task.resolve(specs.len())?;

        let n_assets: usize = specs.iter().map(|s| s.assets.len()).sum();
        let nodes = try_join_all(specs.into_iter().map(|spec| async move {
            let locations = assets.prepare(&spec.assets).await?;
            let urls = locations.into_iter().map(|(name, l)| (name, l.url)).collect();
            Ok::<_, DomainError>(PreparedNode::new(spec, urls))
        }))
        .await
        .inspect_err(|e| error!(error = %e, "Asset preparation failed"))?;

        let lock_timeout = Duration::from_millis(config.scheduler.lock_timeout_ms);
        let convergence = Arc::new(ConvergenceManager::new(
            &settings,
            nodes.iter().map(|n| n.id),
            lock_timeout,
        ));
        let n_nodes = nodes.len();
        let scheduler = Arc::new(Scheduler::new(
            settings.clone(),
            nodes,
            convergence.clone(),
            &config.scheduler,
        ));
        let events = Arc::new(EventBus::new(config.scheduler.event_capacity));
        events.publish(None, None, EventPayload::EpisodeStarted { n_nodes, n_assets });
        info!(
            run_id = %assets.run_id(),
            n_nodes,
            n_assets,
            trial_kind = settings.trial_kind.as_str(),
            expected_trials = settings.expected_trials,
            "Episode initialized"
        );

        Ok(Self {
            tracker: PerformanceTracker::new(&settings),
            settings,
            scheduler,
            convergence,
            analyzer,
            events,
            retry: RetryPolicy::from(&config.retry),
        })
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EpisodeEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn completion(&self) -> Option<CompletionReason> {
        self.scheduler.completion()
    }

    /// Next assignment for a participant, retrying contended claims.
    #[instrument(skip(self))]
    pub async fn next_trial(&self, participant_id: Uuid) -> DomainResult<Assignment> {
        if self.tracker.admission(participant_id).await == AdmissionState::Excluded {
            self.scheduler.finish(participant_id, FinishReason::Excluded).await?;
        }

        let assignment = self
            .retry
            .execute(|| self.scheduler.next_node(participant_id))
            .await;

        match &assignment {
            Ok(Assignment::Trial(trial)) => {
                self.events.publish(
                    Some(participant_id),
                    Some(trial.node_id),
                    EventPayload::TrialAssigned {
                        trial_id: trial.id,
                        position: trial.position,
                    },
                );
            }
            Ok(Assignment::Finished(reason)) => {
                if *reason != FinishReason::Excluded {
                    self.checkpoint(participant_id, Checkpoint::EndOfTask).await;
                }
                self.events.publish(
                    Some(participant_id),
                    None,
                    EventPayload::ParticipantFinished { reason: *reason },
                );
            }
            Ok(Assignment::TaskComplete(reason)) => {
                self.checkpoint(participant_id, Checkpoint::EndOfTask).await;
                info!(reason = reason.as_str(), "Task complete");
                self.events
                    .publish(Some(participant_id), None, EventPayload::TaskCompleted { reason: *reason });
            }
            Err(DomainError::SchedulingExhaustion { detail, .. }) => {
                self.events.publish(
                    Some(participant_id),
                    None,
                    EventPayload::SchedulingExhausted {
                        detail: detail.clone(),
                    },
                );
            }
            Err(_) => {}
        }
        assignment
    }

    /// Render descriptor for a trial.
    pub async fn render(&self, trial_id: Uuid) -> DomainResult<Value> {
        let trial = self.scheduler.trial(trial_id).await?;
        let node = self.scheduler.node_view(trial.node_id).await?;
        Ok(self.settings.trial_kind.render(&trial, &node))
    }

    /// Analyze a response and commit its effects.
    ///
    /// The trial is claimed for this submission before anything is
    /// committed, so a concurrent `abandon` cannot give it a second outcome.
    /// The analyzer runs with no engine lock held. A malformed response
    /// fails the trial; an analyzer error fails the trial and is returned
    /// as [`DomainError::TrialAnalysisFailure`] after bookkeeping.
    #[instrument(skip(self, response))]
    pub async fn submit(&self, trial_id: Uuid, response: &Value) -> DomainResult<TrialReport> {
        let trial = self.scheduler.begin_submit(trial_id).await?;
        let submitted = self.commit_submission(&trial, response).await;
        if submitted.is_err() {
            if let Err(e) = self.scheduler.release_submit(trial_id).await {
                warn!(error = %e, "Could not release failed submission");
            }
        }
        submitted
    }

    async fn commit_submission(&self, trial: &Trial, response: &Value) -> DomainResult<TrialReport> {
        let trial_id = trial.id;
        let participant_id = trial.participant_id;
        let node = self.scheduler.node_view(trial.node_id).await?;

        let mut analyzer_error = None;
        let record = match self
            .settings
            .trial_kind
            .analyze(self.analyzer.as_ref(), response, &node)
            .await
        {
            Ok(record) => record,
            Err(e @ (DomainError::ValidationFailed(_) | DomainError::TimingError(_))) => {
                debug!(error = %e, "Rejected malformed response");
                AnalysisRecord::failed(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Analyzer failed");
                let record = AnalysisRecord::failed(e.to_string());
                analyzer_error = Some(e.to_string());
                record
            }
        };
        let status = if record.failed {
            TrialStatus::Failed
        } else {
            TrialStatus::Completed
        };

        let convergence = if self.settings.is_collaborative() && status == TrialStatus::Completed {
            Some(self.apply_response(trial, &record).await?)
        } else {
            None
        };

        let Resolution {
            trial: resolved,
            node_retired,
        } = self
            .retry
            .execute(|| self.scheduler.resolve(trial_id, status, Some(record.clone())))
            .await?;
        self.tracker.record_outcome(participant_id, &record).await?;
        self.events.publish(
            Some(participant_id),
            Some(resolved.node_id),
            EventPayload::TrialResolved {
                trial_id,
                status,
                reason: record.reason.clone(),
            },
        );
        if node_retired {
            self.events.publish(
                None,
                Some(resolved.node_id),
                EventPayload::NodeRetired {
                    iterations: node.iterations + 1,
                },
            );
        }

        let progress = self.scheduler.progress(participant_id).await?;
        let checkpoint = if progress.resolved >= self.settings.expected_trials {
            Checkpoint::EndOfTask
        } else {
            Checkpoint::AfterTrial
        };
        let verdict = self.checkpoint(participant_id, checkpoint).await;

        if let Some(reason) = analyzer_error {
            return Err(DomainError::TrialAnalysisFailure { trial_id, reason });
        }
        Ok(TrialReport {
            trial: resolved,
            verdict,
            convergence,
            node_retired,
        })
    }

    async fn apply_response(&self, trial: &Trial, record: &AnalysisRecord) -> DomainResult<ResponseOutcome> {
        let response: StepResponse = match &record.normalized_response {
            Some(value) => serde_json::from_value(value.clone())?,
            None => StepResponse::default(),
        };
        let outcome = self
            .retry
            .execute(|| {
                self.convergence
                    .record_response(trial.node_id, trial.participant_id, &response)
            })
            .await?;

        if outcome.created_units > 0 {
            self.scheduler
                .note_created_units(trial.participant_id, trial.node_id)
                .await?;
            self.events.publish(
                Some(trial.participant_id),
                Some(trial.node_id),
                EventPayload::UnitsCreated {
                    count: outcome.created_units,
                },
            );
        }
        if outcome.node_frozen_now && self.scheduler.mark_frozen(trial.node_id)? {
            self.events
                .publish(None, Some(trial.node_id), EventPayload::NodeFrozen);
        }
        Ok(outcome)
    }

    /// Run the performance check and apply an exclusion.
    async fn checkpoint(&self, participant_id: Uuid, checkpoint: Checkpoint) -> Verdict {
        let was_active = self.tracker.admission(participant_id).await == AdmissionState::Active;
        let verdict = self.tracker.check(participant_id, checkpoint).await;
        if let Verdict::Exclude {
            pass_rate,
            threshold,
        } = verdict
        {
            if was_active {
                if let Err(e) = self
                    .scheduler
                    .finish(participant_id, FinishReason::Excluded)
                    .await
                {
                    warn!(error = %e, "Could not mark excluded participant finished");
                }
                self.events.publish(
                    Some(participant_id),
                    None,
                    EventPayload::ParticipantExcluded {
                        pass_rate,
                        threshold,
                    },
                );
            }
        }
        verdict
    }

    /// Resolve a participant's pending trial after a premature exit.
    #[instrument(skip(self))]
    pub async fn abandon(&self, participant_id: Uuid) -> DomainResult<Option<Trial>> {
        let Some(resolution) = self.scheduler.abandon(participant_id).await? else {
            return Ok(None);
        };
        let trial = resolution.trial;
        if trial.status == TrialStatus::Failed {
            if let Some(record) = &trial.result {
                self.tracker.record_outcome(participant_id, record).await?;
            }
            self.checkpoint(participant_id, Checkpoint::AfterTrial).await;
        }
        self.events.publish(
            Some(participant_id),
            Some(trial.node_id),
            EventPayload::TrialAbandoned {
                trial_id: trial.id,
                status: trial.status,
            },
        );
        Ok(Some(trial))
    }

    /// Participant view combining scheduler and tracker state.
    pub async fn participant(&self, participant_id: Uuid) -> DomainResult<Participant> {
        let mut participant = self.scheduler.participant(participant_id).await?;
        participant.outcome_history = self.tracker.history(participant_id).await;
        participant.admission_state = self.tracker.admission(participant_id).await;
        Ok(participant)
    }

    pub async fn progress(&self, participant_id: Uuid) -> DomainResult<ParticipantProgress> {
        self.scheduler.progress(participant_id).await
    }

    pub async fn trial(&self, trial_id: Uuid) -> DomainResult<Trial> {
        self.scheduler.trial(trial_id).await
    }

    pub async fn snapshot(&self) -> DomainResult<Vec<NodeView>> {
        self.scheduler.snapshot().await
    }
}
