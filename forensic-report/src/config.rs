use std::time::Duration;
use thiserror::Error;

use crate::llm::GenerationOptions;
use crate::retry::RetryPolicy;

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}")]
    InvalidValue { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for one section analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub batch_size: usize,
    pub base_retry_delay: Duration,
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
    pub generation: GenerationOptions,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            generation: GenerationOptions::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Defaults overridden by `REPORT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<usize, _>(&lookup, "REPORT_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "REPORT_BASE_RETRY_DELAY_SECS")? {
            config.base_retry_delay = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "REPORT_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "REPORT_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<f32, _>(&lookup, "REPORT_TEMPERATURE")? {
            config.generation.temperature = v;
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "REPORT_MAX_OUTPUT_TOKENS")? {
            config.generation.max_output_tokens = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "REPORT_TIMEOUT_SECS")? {
            config.generation.timeout = Duration::from_secs(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be at least 1".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat interval must be positive".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} outside 0.0..=2.0",
                self.generation.temperature
            )));
        }
        if self.generation.max_output_tokens == 0 {
            return Err(ConfigError::Invalid(
                "max output tokens must be positive".into(),
            ));
        }
        if self.generation.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.base_retry_delay,
            max_retries: self.max_retries,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value: raw,
            }),
    }
}
