//! Simulation configuration.
//!
//! Values come from defaults, optionally overridden by `NEGOT_*` environment
//! variables and then by builder calls (the CLI applies its flags last).

use thiserror::Error;

use super::strategy::DEFAULT_SAMPLE_SIZE;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the run scheduler and the LLM agents.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Runs allowed in flight at once.
    pub max_parallel_runs: usize,
    /// Turn limit per run.
    pub max_turns: u32,
    /// Clarifying questions allowed per session.
    pub max_questions: u32,
    /// Strategy suggestions drawn per run.
    pub strategy_sample_size: usize,
    /// Model used by the LLM agents.
    pub model: String,
    /// Sampling temperature used by the LLM agents.
    pub temperature: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_parallel_runs: 4,
            max_turns: 8,
            max_questions: 0,
            strategy_sample_size: DEFAULT_SAMPLE_SIZE,
            model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.0,
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `NEGOT_MAX_PARALLEL_RUNS`: Runs in flight (default: 4)
    /// - `NEGOT_MAX_TURNS`: Turns per run (default: 8)
    /// - `NEGOT_MAX_QUESTIONS`: Clarifying questions per session (default: 0)
    /// - `NEGOT_STRATEGY_SAMPLE_SIZE`: Suggestions per run (default: 4)
    /// - `NEGOT_MODEL`: Agent model (default: openai/gpt-4o-mini)
    /// - `NEGOT_TEMPERATURE`: Agent temperature (default: 0.0)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = lookup("NEGOT_MAX_PARALLEL_RUNS") {
            config.max_parallel_runs = parse_env_value(&val, "NEGOT_MAX_PARALLEL_RUNS")?;
        }
        if let Some(val) = lookup("NEGOT_MAX_TURNS") {
            config.max_turns = parse_env_value(&val, "NEGOT_MAX_TURNS")?;
        }
        if let Some(val) = lookup("NEGOT_MAX_QUESTIONS") {
            config.max_questions = parse_env_value(&val, "NEGOT_MAX_QUESTIONS")?;
        }
        if let Some(val) = lookup("NEGOT_STRATEGY_SAMPLE_SIZE") {
            config.strategy_sample_size = parse_env_value(&val, "NEGOT_STRATEGY_SAMPLE_SIZE")?;
        }
        if let Some(val) = lookup("NEGOT_MODEL") {
            config.model = val;
        }
        if let Some(val) = lookup("NEGOT_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "NEGOT_TEMPERATURE")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_runs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallel_runs must be greater than 0".to_string(),
            ));
        }
        if self.max_turns == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_turns must be greater than 0".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_parallel_runs(mut self, max_parallel_runs: usize) -> Self {
        self.max_parallel_runs = max_parallel_runs;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_questions(mut self, max_questions: u32) -> Self {
        self.max_questions = max_questions;
        self
    }

    pub fn with_strategy_sample_size(mut self, sample_size: usize) -> Self {
        self.strategy_sample_size = sample_size;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.max_parallel_runs, 4);
        assert_eq!(config.max_turns, 8);
        assert_eq!(config.max_questions, 0);
        assert_eq!(config.strategy_sample_size, 4);
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert!(config.temperature.abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SimulationConfig::new()
            .with_max_parallel_runs(2)
            .with_max_turns(6)
            .with_max_questions(3)
            .with_strategy_sample_size(2)
            .with_model("anthropic/claude-3.5-haiku")
            .with_temperature(0.4);

        assert_eq!(config.max_parallel_runs, 2);
        assert_eq!(config.max_turns, 6);
        assert_eq!(config.max_questions, 3);
        assert_eq!(config.strategy_sample_size, 2);
        assert_eq!(config.model, "anthropic/claude-3.5-haiku");
        assert!((config.temperature - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = SimulationConfig::from_lookup(lookup(&[
            ("NEGOT_MAX_PARALLEL_RUNS", "8"),
            ("NEGOT_MAX_QUESTIONS", " 2 "),
            ("NEGOT_MODEL", "openai/gpt-4o"),
        ]))
        .expect("valid config");
        assert_eq!(config.max_parallel_runs, 8);
        assert_eq!(config.max_questions, 2);
        assert_eq!(config.model, "openai/gpt-4o");
        assert_eq!(config.max_turns, 8);
    }

    #[test]
    fn test_from_lookup_invalid_value() {
        let err = SimulationConfig::from_lookup(lookup(&[("NEGOT_MAX_TURNS", "many")]))
            .expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "NEGOT_MAX_TURNS"));
    }

    #[test]
    fn test_validation_failures() {
        assert!(SimulationConfig::new()
            .with_max_parallel_runs(0)
            .validate()
            .is_err());
        assert!(SimulationConfig::new().with_max_turns(0).validate().is_err());
        assert!(SimulationConfig::new().with_temperature(3.0).validate().is_err());
        assert!(SimulationConfig::new().with_model(" ").validate().is_err());
    }
}
