//! Runtime configuration from environment variables.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::{AnalysisPipeline, AnalystModel, DEFAULT_EXPECTED_STEPS};
use crate::gateway::ollama::{OllamaAdapter, DEFAULT_BASE_URL};
use crate::gateway::{ChatModel, GatewayConfig, ProviderError, ProviderGateway, TracingUsageSink};

pub const DEFAULT_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to build model client: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub expected_steps: usize,
    pub max_retries: u32,
    pub max_tokens: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: 0.0,
            expected_steps: DEFAULT_EXPECTED_STEPS,
            max_retries: 0,
            max_tokens: None,
        }
    }
}

impl AgentConfig {
    /// Read `OLLAMA_*` and `ANOMALY_AGENT_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`AgentConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("OLLAMA_BASE_URL") {
            config.base_url = url.trim().to_string();
        }
        if let Some(model) = get("OLLAMA_MODEL") {
            config.model = model.trim().to_string();
        }
        if let Some(raw) = get("OLLAMA_TIMEOUT_SECONDS") {
            let secs: u64 = parse_var("OLLAMA_TIMEOUT_SECONDS", &raw)?;
            if secs == 0 {
                return Err(invalid("OLLAMA_TIMEOUT_SECONDS", &raw, "must be positive"));
            }
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = get("ANOMALY_AGENT_TEMPERATURE") {
            let t: f32 = parse_var("ANOMALY_AGENT_TEMPERATURE", &raw)?;
            if !t.is_finite() || t < 0.0 {
                return Err(invalid("ANOMALY_AGENT_TEMPERATURE", &raw, "must be >= 0"));
            }
            config.temperature = t;
        }
        if let Some(raw) = get("ANOMALY_AGENT_EXPECTED_STEPS") {
            let n: usize = parse_var("ANOMALY_AGENT_EXPECTED_STEPS", &raw)?;
            if n == 0 {
                return Err(invalid("ANOMALY_AGENT_EXPECTED_STEPS", &raw, "must be at least 1"));
            }
            config.expected_steps = n;
        }
        if let Some(raw) = get("ANOMALY_AGENT_MAX_RETRIES") {
            config.max_retries = parse_var("ANOMALY_AGENT_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("ANOMALY_AGENT_MAX_TOKENS") {
            config.max_tokens = Some(parse_var("ANOMALY_AGENT_MAX_TOKENS", &raw)?);
        }
        Ok(config)
    }

    /// Model client for this configuration, with usage logged through tracing.
    pub fn build_model(&self) -> Result<AnalystModel, ConfigError> {
        let adapter = OllamaAdapter::with_config(self.base_url.clone(), self.timeout)?;
        let gateway = ProviderGateway::with_config(
            adapter,
            Arc::new(TracingUsageSink),
            GatewayConfig {
                max_retries: self.max_retries,
                ..GatewayConfig::default()
            },
        );
        Ok(AnalystModel::new(Arc::new(gateway), ChatModel::ollama(self.model.clone()))
            .temperature(self.temperature)
            .max_tokens(self.max_tokens))
    }

    pub fn build_pipeline(&self) -> Result<AnalysisPipeline, ConfigError> {
        Ok(AnalysisPipeline::new(self.build_model()?).expected_steps(self.expected_steps))
    }
}

fn parse_var<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, raw, &e.to_string()))
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
