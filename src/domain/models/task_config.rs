//! Task configuration for one scheduling episode.
//!
//! [`TaskConfig`] is the user-facing, serde-loaded shape. Count options may
//! be symbolic (`"n_nodes"`) because the node snapshot size is only known
//! once the node source has been evaluated; [`TaskConfig::resolve`] turns
//! the config into immutable [`TaskSettings`] at episode start.

use serde::{Deserialize, Serialize};

use super::trial_kind::TrialKind;
use crate::domain::errors::{DomainError, DomainResult};

/// A count option, either fixed or resolved against the node snapshot size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountSpec {
    Fixed(u32),
    Symbolic(String),
}

impl CountSpec {
    /// Resolve against the number of nodes in the snapshot.
    pub fn resolve(&self, n_nodes: usize) -> DomainResult<u32> {
        match self {
            Self::Fixed(n) => Ok(*n),
            Self::Symbolic(s) => match s.as_str() {
                "n_nodes" | "n_stimuli" => u32::try_from(n_nodes).map_err(|_| {
                    DomainError::ValidationFailed(format!("node count {n_nodes} overflows u32"))
                }),
                other => Err(DomainError::ValidationFailed(format!(
                    "unknown symbolic count '{other}', expected 'n_nodes' or 'n_stimuli'"
                ))),
            },
        }
    }
}

impl Default for CountSpec {
    fn default() -> Self {
        Self::Symbolic("n_nodes".to_string())
    }
}

impl From<u32> for CountSpec {
    fn from(n: u32) -> Self {
        Self::Fixed(n)
    }
}

/// When a collaborative node counts as frozen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeScope {
    /// The node freezes as soon as one of its units freezes.
    #[default]
    AnyUnit,
    /// The node freezes once it has units and every one of them is frozen.
    AllUnits,
}

/// Configuration object parameterizing one scheduling episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    /// Trial behaviour selected for this task
    #[serde(default)]
    pub trial_kind: TrialKind,

    /// Target trial count, used for progress estimation
    #[serde(default)]
    pub expected_trials_per_participant: CountSpec,

    /// Hard cap on trials per participant (defaults to the expected count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_trials_per_participant: Option<CountSpec>,

    /// How many times one node may be assigned to the same participant
    #[serde(default = "default_n_repeat_trials")]
    pub n_repeat_trials: u32,

    /// Ratings a unit needs before it may freeze
    #[serde(default = "default_freeze_on_n_ratings")]
    pub freeze_on_n_ratings: u32,

    /// Mean rating a unit needs before it may freeze
    #[serde(default = "default_freeze_on_mean_rating")]
    pub freeze_on_mean_rating: f64,

    /// Frozen nodes needed to complete the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_on_n_frozen: Option<CountSpec>,

    /// Completed trials per node after which the node retires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<CountSpec>,

    /// Pass-rate cutoff; `None` disables the performance check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_threshold: Option<f64>,

    /// Run the performance check once, after the last trial
    #[serde(default)]
    pub check_performance_at_end: bool,

    /// Count an abandoned trial as failed instead of discarding it
    #[serde(default = "default_true")]
    pub fail_trials_on_premature_exit: bool,

    /// Per-unit vs per-node freeze policy
    #[serde(default)]
    pub freeze_scope: FreezeScope,

    /// Seed for tie-breaking between equally exposed nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
}

const fn default_n_repeat_trials() -> u32 {
    1
}

const fn default_freeze_on_n_ratings() -> u32 {
    3
}

const fn default_freeze_on_mean_rating() -> f64 {
    5.0
}

const fn default_true() -> bool {
    true
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            trial_kind: TrialKind::default(),
            expected_trials_per_participant: CountSpec::default(),
            max_trials_per_participant: None,
            n_repeat_trials: default_n_repeat_trials(),
            freeze_on_n_ratings: default_freeze_on_n_ratings(),
            freeze_on_mean_rating: default_freeze_on_mean_rating(),
            complete_on_n_frozen: None,
            max_iterations: None,
            performance_threshold: None,
            check_performance_at_end: false,
            fail_trials_on_premature_exit: default_true(),
            freeze_scope: FreezeScope::default(),
            rng_seed: None,
        }
    }
}

impl TaskConfig {
    /// Resolve symbolic counts and validate the result.
    pub fn resolve(&self, n_nodes: usize) -> DomainResult<TaskSettings> {
        let expected_trials = self.expected_trials_per_participant.resolve(n_nodes)?;
        let max_trials = match &self.max_trials_per_participant {
            Some(spec) => spec.resolve(n_nodes)?,
            None => expected_trials,
        };
        let complete_on_n_frozen = self
            .complete_on_n_frozen
            .as_ref()
            .map(|spec| spec.resolve(n_nodes))
            .transpose()?;
        let max_iterations = self
            .max_iterations
            .as_ref()
            .map(|spec| spec.resolve(n_nodes))
            .transpose()?;

        let settings = TaskSettings {
            trial_kind: self.trial_kind,
            expected_trials,
            max_trials,
            n_repeat_trials: self.n_repeat_trials.max(1),
            freeze_on_n_ratings: self.freeze_on_n_ratings,
            freeze_on_mean_rating: self.freeze_on_mean_rating,
            complete_on_n_frozen,
            max_iterations,
            performance_threshold: self.performance_threshold,
            check_performance_at_end: self.check_performance_at_end,
            fail_trials_on_premature_exit: self.fail_trials_on_premature_exit,
            freeze_scope: self.freeze_scope,
            rng_seed: self.rng_seed,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Resolved, immutable task parameters for a running episode.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub trial_kind: TrialKind,
    pub expected_trials: u32,
    pub max_trials: u32,
    /// Always at least 1.
    pub n_repeat_trials: u32,
    pub freeze_on_n_ratings: u32,
    pub freeze_on_mean_rating: f64,
    pub complete_on_n_frozen: Option<u32>,
    pub max_iterations: Option<u32>,
    pub performance_threshold: Option<f64>,
    pub check_performance_at_end: bool,
    pub fail_trials_on_premature_exit: bool,
    pub freeze_scope: FreezeScope,
    pub rng_seed: Option<u64>,
}

impl TaskSettings {
    fn validate(&self) -> DomainResult<()> {
        if self.max_trials == 0 {
            return Err(DomainError::ValidationFailed(
                "max_trials_per_participant must be at least 1".to_string(),
            ));
        }
        if self.expected_trials > self.max_trials {
            return Err(DomainError::ValidationFailed(format!(
                "expected_trials_per_participant ({}) exceeds max_trials_per_participant ({})",
                self.expected_trials, self.max_trials
            )));
        }
        if self.freeze_on_n_ratings == 0 {
            return Err(DomainError::ValidationFailed(
                "freeze_on_n_ratings must be at least 1".to_string(),
            ));
        }
        if !self.freeze_on_mean_rating.is_finite() {
            return Err(DomainError::ValidationFailed(
                "freeze_on_mean_rating must be finite".to_string(),
            ));
        }
        if self.max_iterations == Some(0) {
            return Err(DomainError::ValidationFailed(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.complete_on_n_frozen == Some(0) {
            return Err(DomainError::ValidationFailed(
                "complete_on_n_frozen must be at least 1".to_string(),
            ));
        }
        if let Some(threshold) = self.performance_threshold {
            if !(0.0..1.0).contains(&threshold) {
                return Err(DomainError::ValidationFailed(format!(
                    "performance_threshold {threshold} must be in [0, 1)"
                )));
            }
        }
        Ok(())
    }

    /// Whether nodes collect response units and freeze.
    pub fn is_collaborative(&self) -> bool {
        self.trial_kind.is_collaborative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_counts_resolve_to_snapshot_size() {
        let config = TaskConfig {
            trial_kind: TrialKind::StepTag,
            complete_on_n_frozen: Some(CountSpec::Symbolic("n_stimuli".to_string())),
            max_iterations: Some(CountSpec::Symbolic("n_nodes".to_string())),
            ..Default::default()
        };
        let settings = config.resolve(7).expect("config should resolve");
        assert_eq!(settings.expected_trials, 7);
        assert_eq!(settings.max_trials, 7);
        assert_eq!(settings.complete_on_n_frozen, Some(7));
        assert_eq!(settings.max_iterations, Some(7));
        assert!(settings.is_collaborative());
    }

    #[test]
    fn test_unknown_symbol_rejected() {
        let spec = CountSpec::Symbolic("n_things".to_string());
        assert!(matches!(
            spec.resolve(3),
            Err(DomainError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_expected_above_max_rejected() {
        let config = TaskConfig {
            expected_trials_per_participant: CountSpec::Fixed(5),
            max_trials_per_participant: Some(CountSpec::Fixed(3)),
            ..Default::default()
        };
        assert!(config.resolve(10).is_err());
    }

    #[test]
    fn test_zero_repeat_trials_normalized() {
        let config = TaskConfig {
            n_repeat_trials: 0,
            ..Default::default()
        };
        assert_eq!(config.resolve(2).unwrap().n_repeat_trials, 1);
    }

    #[test]
    fn test_threshold_range_checked() {
        let config = TaskConfig {
            performance_threshold: Some(1.0),
            ..Default::default()
        };
        assert!(config.resolve(2).is_err());
    }

    #[test]
    fn test_yaml_with_mixed_counts() {
        let yaml = r"
trial_kind: step_tag
expected_trials_per_participant: n_stimuli
max_trials_per_participant: 12
freeze_on_n_ratings: 3
freeze_on_mean_rating: 5
complete_on_n_frozen: n_stimuli
max_iterations: 10
freeze_scope: all_units
";
        let config: TaskConfig = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.max_trials_per_participant, Some(CountSpec::Fixed(12)));
        assert_eq!(config.freeze_scope, FreezeScope::AllUnits);
        let settings = config.resolve(10).unwrap();
        assert_eq!(settings.max_iterations, Some(10));
        assert!(settings.fail_trials_on_premature_exit);
    }
}
