//! Embedding provider implementations.

pub mod mock;
pub mod ollama;
pub mod openai;

pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use docsync_core::{AppError, AppResult};
use reqwest::StatusCode;

/// Map an unsuccessful HTTP response to a transient or permanent error.
///
/// Rate limiting (429), request timeouts (408) and server errors are worth
/// retrying; any other client error will fail the same way again.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> AppError {
    let message = format!("{} API error {}: {}", provider, status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        AppError::Embedding(message)
    } else {
        AppError::EmbeddingRejected(message)
    }
}

/// Check the shape of a provider response against the request.
pub(crate) fn check_vectors(
    provider: &str,
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimensions: usize,
) -> AppResult<()> {
    if vectors.len() != expected_count {
        return Err(AppError::Embedding(format!(
            "{} returned {} embeddings for {} inputs",
            provider,
            vectors.len(),
            expected_count
        )));
    }

    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(AppError::EmbeddingRejected(format!(
            "{} returned {} dimensional embedding, expected {}",
            provider,
            bad.len(),
            dimensions
        )));
    }

    Ok(())
}
