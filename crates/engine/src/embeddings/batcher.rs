//! Bounded-size embedding batches with retry and backoff.

use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
use crate::types::Fragment;
use docsync_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How fragments are grouped and how failed calls are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    pub max_batch_size: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

impl BatchPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_batch_size: config.batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            call_timeout: config.call_timeout(),
        }
    }

    /// Delay before retrying after `attempt` failed attempts (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// A fragment paired with its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedFragment {
    pub fragment: Fragment,
    pub vector: Vec<f32>,
}

/// A batch whose attempts were exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Position of the batch within the submitted sequence
    pub batch_index: usize,
    pub fragment_ids: Vec<String>,
    pub attempts: u32,
    pub reason: String,
}

/// Result of embedding a sequence of fragments.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Successfully embedded fragments, in submission order
    pub embedded: Vec<EmbeddedFragment>,
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sends fragments to an embedding provider in bounded batches.
#[derive(Debug, Clone)]
pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    policy: BatchPolicy,
}

impl EmbeddingBatcher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: BatchPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed `fragments` batch by batch, preserving order.
    ///
    /// Every fragment ends up either in `embedded` or in exactly one
    /// `BatchFailure`. Once a batch is exhausted the file cannot be written
    /// anyway, so later batches are not sent and are reported with zero
    /// attempts.
    pub async fn embed(&self, fragments: Vec<Fragment>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut remaining = fragments.into_iter().peekable();
        let mut batch_index = 0;
        let mut exhausted: Option<usize> = None;

        while remaining.peek().is_some() {
            let batch: Vec<Fragment> = remaining.by_ref().take(self.policy.max_batch_size).collect();

            if let Some(failed_index) = exhausted {
                outcome.failures.push(BatchFailure {
                    batch_index,
                    fragment_ids: batch.into_iter().map(|f| f.id).collect(),
                    attempts: 0,
                    reason: format!("skipped after batch {} failed", failed_index),
                });
                batch_index += 1;
                continue;
            }

            let texts: Vec<String> = batch.iter().map(|f| f.text.clone()).collect();

            match self.embed_with_retries(&texts).await {
                Ok(vectors) => {
                    outcome.embedded.extend(
                        batch
                            .into_iter()
                            .zip(vectors)
                            .map(|(fragment, vector)| EmbeddedFragment { fragment, vector }),
                    );
                }
                Err((attempts, err)) => {
                    warn!(
                        "Embedding batch {} ({} fragments) failed after {} attempt(s): {}",
                        batch_index,
                        batch.len(),
                        attempts,
                        err
                    );
                    outcome.failures.push(BatchFailure {
                        batch_index,
                        fragment_ids: batch.into_iter().map(|f| f.id).collect(),
                        attempts,
                        reason: err.to_string(),
                    });
                    exhausted = Some(batch_index);
                }
            }

            batch_index += 1;
        }

        outcome
    }

    /// Call the provider until it succeeds, fails permanently, or attempts run out.
    async fn embed_with_retries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, (u32, AppError)> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.call_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.policy.max_attempts {
                return Err((attempt, err));
            }

            let delay = self.policy.backoff(attempt);
            debug!(
                "Embedding attempt {}/{} failed, retrying in {:?}: {}",
                attempt, self.policy.max_attempts, delay, err
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One bounded provider call, with the response shape checked.
    async fn call_once(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let vectors = tokio::time::timeout(self.policy.call_timeout, self.provider.embed_batch(texts))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "embedding call to {} exceeded {:?}",
                    self.provider.provider_name(),
                    self.policy.call_timeout
                ))
            })??;

        if vectors.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        let dimensions = self.provider.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(AppError::Embedding(format!(
                "provider returned a {} dimensional vector, expected {}",
                bad.len(),
                dimensions
            )));
        }

        Ok(vectors)
    }
}
