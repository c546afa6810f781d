//! Embedding generation for fragments.
//!
//! Providers turn text into vectors with a single call per batch; the
//! [`EmbeddingBatcher`] groups fragments, bounds each call with a timeout and
//! retries transient failures with exponential backoff.

pub mod batcher;
pub mod config;
pub mod provider;
pub mod providers;

pub use batcher::{BatchFailure, BatchOutcome, BatchPolicy, EmbeddedFragment, EmbeddingBatcher};
pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};
