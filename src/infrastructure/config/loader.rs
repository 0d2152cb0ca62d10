use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::{CountSpec, TaskConfig};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Storage root cannot be empty")]
    EmptyStorageRoot,

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid scheduler setting: {0}")]
    InvalidScheduler(String),

    #[error("Invalid task configuration: {0}")]
    InvalidTask(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .trialnet/config.yaml (project config)
    /// 3. .trialnet/local.yaml (project local overrides, optional)
    /// 4. Environment variables (TRIALNET_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".trialnet/config.yaml"))
            .merge(Yaml::file(".trialnet/local.yaml"))
            .merge(Env::prefixed("TRIALNET_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if !["daily", "hourly", "never"].contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        if config.storage.root.is_empty() {
            return Err(ConfigError::EmptyStorageRoot);
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.scheduler.claim_attempts == 0 {
            return Err(ConfigError::InvalidScheduler(
                "claim_attempts must be at least 1".to_string(),
            ));
        }
        if config.scheduler.event_capacity == 0 {
            return Err(ConfigError::InvalidScheduler(
                "event_capacity must be at least 1".to_string(),
            ));
        }

        Self::validate_task(&config.task)
    }

    /// Checks that do not depend on the node snapshot size.
    ///
    /// Symbolic counts are fully checked when the episode resolves them.
    fn validate_task(task: &TaskConfig) -> Result<(), ConfigError> {
        let counts = [
            ("expected_trials_per_participant", Some(&task.expected_trials_per_participant)),
            ("max_trials_per_participant", task.max_trials_per_participant.as_ref()),
            ("complete_on_n_frozen", task.complete_on_n_frozen.as_ref()),
            ("max_iterations", task.max_iterations.as_ref()),
        ];
        for (name, spec) in counts {
            match spec {
                Some(symbolic @ CountSpec::Symbolic(_)) => {
                    symbolic
                        .resolve(1)
                        .map_err(|e| ConfigError::InvalidTask(format!("{name}: {e}")))?;
                }
                Some(CountSpec::Fixed(0)) if name != "expected_trials_per_participant" => {
                    return Err(ConfigError::InvalidTask(format!("{name} must be at least 1")));
                }
                _ => {}
            }
        }

        if let (CountSpec::Fixed(expected), Some(CountSpec::Fixed(max))) = (
            &task.expected_trials_per_participant,
            &task.max_trials_per_participant,
        ) {
            if expected > max {
                return Err(ConfigError::InvalidTask(format!(
                    "expected_trials_per_participant ({expected}) exceeds max_trials_per_participant ({max})"
                )));
            }
        }

        if task.freeze_on_n_ratings == 0 {
            return Err(ConfigError::InvalidTask(
                "freeze_on_n_ratings must be at least 1".to_string(),
            ));
        }
        if !task.freeze_on_mean_rating.is_finite() {
            return Err(ConfigError::InvalidTask(
                "freeze_on_mean_rating must be finite".to_string(),
            ));
        }
        if let Some(threshold) = task.performance_threshold {
            if !(0.0..1.0).contains(&threshold) {
                return Err(ConfigError::InvalidTask(format!(
                    "performance_threshold {threshold} must be in [0, 1)"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FreezeScope, TrialKind};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".trialnet/trialnet.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.scheduler.claim_attempts, 8);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: pretty
  rotation: hourly
task:
  trial_kind: step_tag
  freeze_on_n_ratings: 3
  freeze_on_mean_rating: 5
  complete_on_n_frozen: n_stimuli
  max_iterations: 10
  freeze_scope: all_units
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.task.trial_kind, TrialKind::StepTag);
        assert_eq!(config.task.freeze_scope, FreezeScope::AllUnits);
        assert_eq!(config.task.max_iterations, Some(CountSpec::Fixed(10)));

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogFormat(_)
        ));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxConnections(0)
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 300;
        config.retry.max_backoff_ms = 100;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBackoff(300, 100)
        ));
    }

    #[test]
    fn test_validate_task_counts() {
        let mut config = Config::default();
        config.task.max_iterations = Some(CountSpec::Fixed(0));
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidTask(_)
        ));

        let mut config = Config::default();
        config.task.complete_on_n_frozen = Some(CountSpec::Symbolic("all".to_string()));
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidTask(_)
        ));

        let mut config = Config::default();
        config.task.expected_trials_per_participant = CountSpec::Fixed(10);
        config.task.max_trials_per_participant = Some(CountSpec::Fixed(4));
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_threshold_range() {
        let mut config = Config::default();
        config.task.performance_threshold = Some(-0.1);
        assert!(ConfigLoader::validate(&config).is_err());
        config.task.performance_threshold = Some(0.6);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_env_override() {
        temp_env::with_vars(
            [
                ("TRIALNET_LOGGING__LEVEL", Some("debug")),
                ("TRIALNET_TASK__MAX_ITERATIONS", Some("12")),
                ("TRIALNET_SCHEDULER__CLAIM_ATTEMPTS", Some("3")),
            ],
            || {
                let config = ConfigLoader::load().expect("env config should load");
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.task.max_iterations, Some(CountSpec::Fixed(12)));
                assert_eq!(config.scheduler.claim_attempts, 3);
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "logging:\n  level: info\n  format: json\ntask:\n  n_repeat_trials: 2"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "logging:\n  level: debug\ntask:\n  n_repeat_trials: 3").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.task.n_repeat_trials, 3, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
