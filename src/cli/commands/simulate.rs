//! Implementation of the `trialnet simulate` command.
//!
//! Runs a full episode in-process with synthetic participants. Each bot
//! loops over assignments until the task completes or it is finished,
//! answering in the shape its trial kind expects.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::build_asset_cache;
use crate::adapters::{DirectoryNodeSource, PairwiseNodeSource, ScoreThresholdAnalyzer, StaticNodeSource};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::cli::types::SimulateArgs;
use crate::domain::errors::DomainError;
use crate::domain::models::{AdmissionState, NodeSpec, NodeView, TrialKind};
use crate::domain::ports::{AcceptAllAnalyzer, Analyzer, NodeSource};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{Assignment, Episode, Verdict};

const VOCABULARY: &[&str] = &[
    "happy", "calm", "bright", "warm", "tense", "sad", "dark", "playful", "noisy", "sparse",
];

/// Tags every bot rates highly.
const CONSENSUS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct BotBehaviour {
    kind: TrialKind,
    failure_rate: f64,
    abandon_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub trials: u32,
    pub submitted: u32,
    pub abandoned: u32,
    pub pass_rate: Option<f64>,
    pub admission: AdmissionState,
    pub exit: String,
}

#[derive(Debug, Serialize)]
pub struct SimulateOutput {
    pub trial_kind: String,
    pub n_nodes: usize,
    pub completion: Option<String>,
    pub events_published: u64,
    pub participants: Vec<ParticipantSummary>,
    pub nodes: Vec<NodeView>,
}

impl CommandOutput for SimulateOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Simulated {} participant(s) on {} {} node(s)",
            self.participants.len(),
            self.n_nodes,
            self.trial_kind
        )];
        lines.push(format!(
            "Completion: {}",
            self.completion.as_deref().unwrap_or("not reached")
        ));
        lines.push(format!("Events published: {}", self.events_published));

        let excluded = self
            .participants
            .iter()
            .filter(|p| p.admission == AdmissionState::Excluded)
            .count();
        let trials: u32 = self.participants.iter().map(|p| p.trials).sum();
        lines.push(format!("Trials counted: {trials} ({excluded} participant(s) excluded)"));
        lines.push(String::new());
        lines.push(TableFormatter::new().format_nodes(&self.nodes));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: SimulateArgs, json_mode: bool) -> Result<()> {
    for (name, rate) in [("failure-rate", args.failure_rate), ("abandon-rate", args.abandon_rate)] {
        if !(0.0..=1.0).contains(&rate) {
            bail!("--{name} must be between 0 and 1, got {rate}");
        }
    }
    if args.participants == 0 {
        bail!("--participants must be at least 1");
    }

    let mut config = ConfigLoader::load().context("Failed to load configuration")?;
    if let Some(kind) = args.kind {
        config.task.trial_kind = kind.into();
    }
    if args.seed.is_some() {
        config.task.rng_seed = args.seed;
    }
    let kind = config.task.trial_kind;

    let source: Box<dyn NodeSource> = match &args.stimuli {
        Some(dir) if args.pairwise => Box::new(PairwiseNodeSource::new(DirectoryNodeSource::new(
            dir.clone(),
            args.extension.clone(),
        ))),
        Some(dir) => Box::new(DirectoryNodeSource::new(dir.clone(), args.extension.clone())),
        None => Box::new(StaticNodeSource::new(synthetic_nodes(kind, args.nodes))),
    };

    let analyzer: Arc<dyn Analyzer> = match kind {
        TrialKind::Rating | TrialKind::Tapping | TrialKind::Choice => {
            Arc::new(ScoreThresholdAnalyzer::new("score", 0.5))
        }
        TrialKind::StepTag | TrialKind::TimedButton => Arc::new(AcceptAllAnalyzer),
    };

    let assets = build_asset_cache(&config).await?;
    let episode = Arc::new(
        Episode::initialize(&config, source.as_ref(), &assets, analyzer)
            .await
            .context("Failed to initialize episode")?,
    );

    let behaviour = BotBehaviour {
        kind,
        failure_rate: args.failure_rate,
        abandon_rate: args.abandon_rate,
    };
    let base_seed = args.seed.unwrap_or_else(|| rand::rng().random());
    let handles: Vec<_> = (0..args.participants)
        .map(|i| {
            let episode = episode.clone();
            let seed = base_seed.wrapping_add(i as u64);
            tokio::spawn(async move { run_bot(&episode, behaviour, seed).await })
        })
        .collect();

    let mut participants = Vec::with_capacity(handles.len());
    for handle in futures::future::join_all(handles).await {
        participants.push(handle.context("Participant task panicked")??);
    }

    let nodes = episode.snapshot().await?;
    let result = SimulateOutput {
        trial_kind: kind.as_str().to_string(),
        n_nodes: nodes.len(),
        completion: episode.completion().map(|r| r.as_str().to_string()),
        events_published: episode.events().current_sequence().0,
        participants,
        nodes,
    };
    info!(
        completion = result.completion.as_deref().unwrap_or("none"),
        participants = result.participants.len(),
        "Simulation finished"
    );
    output(&result, json_mode);
    Ok(())
}

fn synthetic_nodes(kind: TrialKind, n: usize) -> Vec<NodeSpec> {
    (0..n)
        .map(|i| {
            let mut definition = json!({ "name": format!("node-{i:02}") });
            if kind == TrialKind::Choice {
                definition["correct"] = json!(if i % 2 == 0 { "a" } else { "b" });
            }
            NodeSpec::new(definition)
        })
        .collect()
}

async fn run_bot(episode: &Episode, behaviour: BotBehaviour, seed: u64) -> Result<ParticipantSummary> {
    let participant_id = Uuid::new_v4();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut submitted = 0;
    let mut abandoned = 0;

    let exit = loop {
        let trial = match episode.next_trial(participant_id).await {
            Ok(Assignment::Trial(trial)) => trial,
            Ok(Assignment::TaskComplete(reason)) => break format!("task complete ({})", reason.as_str()),
            Ok(Assignment::Finished(reason)) => break reason.as_str().to_string(),
            Err(e) if e.is_episode_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(participant_id = %participant_id, error = %e, "Participant stopped");
                break format!("error: {e}");
            }
        };

        if rng.random_bool(behaviour.abandon_rate) {
            episode.abandon(participant_id).await?;
            abandoned += 1;
            continue;
        }

        let page = episode.render(trial.id).await?;
        let fail = rng.random_bool(behaviour.failure_rate);
        let response = respond(behaviour.kind, &page, fail, &mut rng);
        submitted += 1;
        match episode.submit(trial.id, &response).await {
            Ok(report) => {
                if let Verdict::Exclude { pass_rate, .. } = report.verdict {
                    info!(participant_id = %participant_id, pass_rate, "Bot excluded");
                }
            }
            Err(DomainError::TrialAnalysisFailure { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    };

    let participant = episode.participant(participant_id).await?;
    Ok(ParticipantSummary {
        id: participant_id,
        trials: participant.trial_count,
        submitted,
        abandoned,
        pass_rate: participant.pass_rate(),
        admission: participant.admission_state,
        exit,
    })
}

/// Build a response in the shape `kind` expects. `fail` makes it one the
/// engine will record as a failed trial.
fn respond(kind: TrialKind, page: &Value, fail: bool, rng: &mut StdRng) -> Value {
    let score = if fail { 0.0 } else { 1.0 };
    match kind {
        TrialKind::Rating => json!({ "rating": rng.random_range(1..=7), "score": score }),
        TrialKind::Tapping => json!({ "taps": rng.random_range(4..=12), "score": score }),
        TrialKind::Choice => {
            let correct = page["definition"]["correct"].as_str().unwrap_or("a");
            let choice = if fail { "wrong" } else { correct };
            json!({ "choice": choice, "score": score })
        }
        TrialKind::TimedButton => timed_button_log(fail, rng),
        TrialKind::StepTag => step_tag_response(page, fail, rng),
    }
}

fn timed_button_log(fail: bool, rng: &mut StdRng) -> Value {
    let start = Utc::now();
    let mut log = Vec::new();
    // A press before the prompt starts is a timing error.
    if fail {
        log.push(json!({ "eventType": "pushButtonClicked", "localTime": start - ChronoDuration::milliseconds(50) }));
    }
    log.push(json!({ "eventType": "promptStart", "localTime": start }));
    let mut at = start;
    for _ in 0..rng.random_range(1..=4) {
        at += ChronoDuration::milliseconds(rng.random_range(200..=1500));
        log.push(json!({ "eventType": "pushButtonClicked", "localTime": at }));
    }
    json!({ "event_log": log })
}

fn step_tag_response(page: &Value, fail: bool, rng: &mut StdRng) -> Value {
    if fail {
        return json!({ "ratings": [], "proposals": ["  "] });
    }
    let texts = |field: &str| -> Vec<String> {
        page[field]
            .as_array()
            .map(|units| units.iter().filter_map(|u| u.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    let open = texts("open_units");
    let frozen = texts("frozen_units");

    let ratings: Vec<Value> = open
        .iter()
        .map(|unit| {
            let liked = VOCABULARY[..CONSENSUS].contains(&unit.as_str());
            let rating = if liked { 5.0 } else { f64::from(rng.random_range(1..=4u8)) };
            json!({ "unit": unit, "rating": rating })
        })
        .collect();

    let unused: Vec<&str> = VOCABULARY
        .iter()
        .copied()
        .filter(|tag| !open.iter().chain(&frozen).any(|u| u.as_str() == *tag))
        .collect();
    let proposals: Vec<&str> = if !unused.is_empty() && (open.is_empty() || rng.random_bool(0.3)) {
        vec![unused[rng.random_range(0..unused.len())]]
    } else {
        vec![]
    };

    json!({ "ratings": ratings, "proposals": proposals })
}
