//! Incremental document sync engine.
//!
//! Keeps a vector index consistent with a directory of documents: only files
//! whose content (or fragmenter configuration) changed since the last run are
//! re-embedded, and fragments of deleted files are removed.

pub mod config;
pub mod embeddings;
pub mod extract;
pub mod fingerprint;
pub mod fragment;
pub mod lock;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod scan;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::{load_config, save_config, SyncConfig};
pub use extract::{PlainTextExtractor, TextExtractor};
pub use orchestrator::{PlanReport, StatusReport, SyncOrchestrator};
pub use progress::{ProgressEvent, ProgressReporter, SyncPhase};
pub use types::{ChangePlan, FailureKind, FileFailure, PlanCounts, SyncSummary};

use docsync_core::config::AppConfig;
use docsync_core::AppResult;
use std::sync::Arc;

/// Build an orchestrator from the workspace configuration.
///
/// The store, embedding provider and extractor are constructed once here and
/// shared by every run of the returned orchestrator.
pub fn open(app_config: &AppConfig, config: SyncConfig) -> AppResult<SyncOrchestrator> {
    config.validate()?;
    app_config.ensure_state_dir()?;

    let store = store::create_store(&config.store, &app_config.workspace)?;
    let provider = embeddings::create_provider(&config.embedding)?;
    let extractor: Arc<dyn TextExtractor> = Arc::new(PlainTextExtractor::new());

    tracing::info!(
        "Opened {} store with {} embeddings ({}, {} dims)",
        store.backend_name(),
        provider.provider_name(),
        provider.model_name(),
        provider.dimensions()
    );

    SyncOrchestrator::new(store, provider, extractor, config, app_config.lock_dir())
}
