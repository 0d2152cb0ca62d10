//! End-to-end episode scenarios.
//!
//! Covers convergence by freezing and by iteration exhaustion, end-of-task
//! performance checks, single-flight asset generation and repeat limits.

mod common;

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use trialnet::adapters::{LocalStorage, ScoreThresholdAnalyzer};
use trialnet::domain::models::{
    AdmissionState, AssetKey, CountSpec, NodeState, TaskConfig, TrialKind, TrialStatus,
};
use trialnet::domain::ports::{AcceptAllAnalyzer, AssetGenerator, Storage};
use trialnet::services::{Assignment, CompletionReason, FinishReason, GenerateOptions, Verdict};
use trialnet::DomainResult;

use common::{asset_cache, episode, next_trial, temp_dir, units};

fn convergence_task() -> TaskConfig {
    TaskConfig {
        trial_kind: TrialKind::StepTag,
        freeze_on_n_ratings: 3,
        freeze_on_mean_rating: 5.0,
        complete_on_n_frozen: Some(CountSpec::Fixed(10)),
        max_iterations: Some(CountSpec::Fixed(10)),
        rng_seed: Some(42),
        ..Default::default()
    }
}

/// Run one participant through every node it is offered, answering with
/// `rating` for each open unit and proposing "bright" where none exists.
async fn tagging_round(episode: &trialnet::Episode, rating: f64) -> Option<Assignment> {
    let participant = Uuid::new_v4();
    loop {
        match episode.next_trial(participant).await.expect("assignment") {
            Assignment::Trial(trial) => {
                let page = episode.render(trial.id).await.unwrap();
                let (open, frozen) = units(&page);
                let proposals: Vec<&str> = if open.is_empty() && frozen.is_empty() {
                    vec!["bright"]
                } else {
                    vec![]
                };
                let ratings: Vec<Value> = open
                    .iter()
                    .map(|u| json!({ "unit": u, "rating": rating }))
                    .collect();
                let report = episode
                    .submit(trial.id, &json!({ "ratings": ratings, "proposals": proposals }))
                    .await
                    .unwrap();
                assert_eq!(report.trial.status, TrialStatus::Completed);
            }
            Assignment::Finished(_) => return None,
            done @ Assignment::TaskComplete(_) => return Some(done),
        }
    }
}

#[tokio::test]
async fn test_task_completes_when_all_nodes_freeze() {
    let episode = episode(convergence_task(), 10, Arc::new(AcceptAllAnalyzer)).await;

    // One proposer, then three unanimous raters
    assert!(tagging_round(&episode, 5.0).await.is_none());
    for _ in 0..2 {
        assert!(tagging_round(&episode, 5.0).await.is_none());
        assert_eq!(episode.completion(), None);
    }
    // The last rater freezes the tenth node and is told the task is done
    assert_eq!(
        tagging_round(&episode, 5.0).await,
        Some(Assignment::TaskComplete(CompletionReason::FrozenTarget))
    );

    let nodes = episode.snapshot().await.unwrap();
    assert!(nodes.iter().all(|n| n.state == NodeState::Frozen));
    assert!(nodes.iter().all(|n| n.iterations == 4));
    assert_eq!(episode.completion(), Some(CompletionReason::FrozenTarget));
    assert_eq!(
        episode.next_trial(Uuid::new_v4()).await.unwrap(),
        Assignment::TaskComplete(CompletionReason::FrozenTarget)
    );
}

#[tokio::test]
async fn test_task_completes_after_max_iteration_rounds() {
    let episode = episode(convergence_task(), 10, Arc::new(AcceptAllAnalyzer)).await;

    // Low ratings never freeze; every participant adds one round
    for round in 1..=9 {
        assert!(tagging_round(&episode, 1.0).await.is_none());
        assert_eq!(episode.completion(), None, "completed early at round {round}");
    }
    assert_eq!(
        tagging_round(&episode, 1.0).await,
        Some(Assignment::TaskComplete(CompletionReason::IterationsExhausted))
    );

    let nodes = episode.snapshot().await.unwrap();
    assert!(nodes.iter().all(|n| n.state == NodeState::Retired));
    assert!(nodes.iter().all(|n| n.iterations == 10));
    assert!(nodes.iter().all(|n| n.units.iter().all(|u| !u.frozen)));
    assert_eq!(episode.completion(), Some(CompletionReason::IterationsExhausted));
}

#[tokio::test]
async fn test_end_of_task_check_excludes_only_after_last_trial() {
    let task = TaskConfig {
        trial_kind: TrialKind::Tapping,
        expected_trials_per_participant: CountSpec::Fixed(3),
        performance_threshold: Some(0.6),
        check_performance_at_end: true,
        ..Default::default()
    };
    let analyzer = Arc::new(ScoreThresholdAnalyzer::new("num_detected_taps", 5.0));
    let episode = episode(task, 5, analyzer).await;
    let participant = Uuid::new_v4();

    for (i, taps) in [8, 1, 2].into_iter().enumerate() {
        let trial = next_trial(&episode, participant).await;
        let report = episode
            .submit(trial.id, &json!({ "num_detected_taps": taps }))
            .await
            .unwrap();
        let admission = episode.participant(participant).await.unwrap().admission_state;
        if i < 2 {
            assert_eq!(report.verdict, Verdict::Continue);
            assert_eq!(admission, AdmissionState::Active, "excluded after trial {}", i + 1);
        } else {
            assert!(matches!(report.verdict, Verdict::Exclude { .. }));
            assert_eq!(admission, AdmissionState::Excluded);
        }
    }

    let participant_view = episode.participant(participant).await.unwrap();
    assert!((participant_view.pass_rate().unwrap() - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(
        episode.next_trial(participant).await.unwrap(),
        Assignment::Finished(FinishReason::Excluded)
    );
}

struct CountingGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl AssetGenerator for CountingGenerator {
    async fn generate(&self, scratch: &Path, params: &Value) -> DomainResult<()> {
        let run = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let body = format!("{} run {run}", params["stim_name"].as_str().unwrap_or_default());
        tokio::fs::write(scratch.join("stimA.wav"), body).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_concurrent_ensure_generates_once() {
    let dir = temp_dir();
    let cache = asset_cache(dir.path());
    let generator = CountingGenerator {
        calls: AtomicUsize::new(0),
    };
    let key = AssetKey::from_raw("stimA");
    let params = json!({ "stim_name": "stimA" });
    let options = GenerateOptions::default();

    let (first, second) = tokio::join!(
        cache.ensure_with(&key, &generator, &params, options),
        cache.ensure_with(&key, &generator, &params, options),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    let storage = LocalStorage::new(dir.path(), "/static");
    let content = storage.read(&first).await.unwrap();
    assert_eq!(String::from_utf8(content).unwrap(), "stimA run 1");
}

#[tokio::test]
async fn test_single_repeat_never_reassigns_a_node() {
    let task = TaskConfig {
        expected_trials_per_participant: CountSpec::Fixed(4),
        max_trials_per_participant: Some(CountSpec::Fixed(6)),
        n_repeat_trials: 1,
        rng_seed: Some(3),
        ..Default::default()
    };
    let episode = episode(task, 4, Arc::new(AcceptAllAnalyzer)).await;
    let participant = Uuid::new_v4();

    let mut seen = HashSet::new();
    for _ in 0..4 {
        let trial = next_trial(&episode, participant).await;
        assert!(seen.insert(trial.node_id), "node {} assigned twice", trial.node_id);
        episode.submit(trial.id, &json!({ "rating": 3 })).await.unwrap();
    }
    assert_eq!(
        episode.next_trial(participant).await.unwrap(),
        Assignment::Finished(FinishReason::NodesExhausted)
    );

    // Another participant still sees every node
    let other = Uuid::new_v4();
    let trial = next_trial(&episode, other).await;
    assert!(seen.contains(&trial.node_id));
}
