//! Embedding configuration types.

use docsync_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embedding provider and batching configuration (`sync.embedding` section).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "mock", "ollama", "openai"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier (provider-specific)
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding vector dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Base URL of the provider API; provider default when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum fragments per provider call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts per batch before it is reported as failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles on every further attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on a single retry delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Time limit for one provider call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "trigram-v1".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dimensions: default_dimensions(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Validate values that would otherwise fail mid-run.
    pub fn validate(&self) -> AppResult<()> {
        if self.dimensions == 0 {
            return Err(AppError::Config(
                "embedding.dimensions must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(AppError::Config(
                "embedding.batch_size must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(AppError::Config(
                "embedding.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(AppError::Config(
                "embedding.timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check that a provider produces vectors the configuration promises.
    pub fn validate_consistency(&self, provider_name: &str, dimensions: usize) -> AppResult<()> {
        if self.dimensions != dimensions {
            return Err(AppError::Config(format!(
                "Dimension mismatch for provider '{}': configured {}, provider reports {}",
                provider_name, self.dimensions, dimensions
            )));
        }

        Ok(())
    }
}
