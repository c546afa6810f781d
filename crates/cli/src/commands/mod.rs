//! Command handlers for the docsync CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod reset;
pub mod status;
pub mod sync;

// Re-export command types for convenience
pub use reset::ResetCommand;
pub use status::StatusCommand;
pub use sync::SyncCommand;

use docsync_core::{config::AppConfig, AppResult};
use docsync_engine::{load_config, save_config, SyncConfig, SyncOrchestrator};

/// Load the sync configuration, writing the defaults on first use.
pub fn load_sync_config(config: &AppConfig) -> AppResult<SyncConfig> {
    let path = config.config_path();
    let sync_config = load_config(&path)?;

    if !path.exists() {
        save_config(&path, &sync_config)?;
        tracing::info!("Wrote default configuration to {:?}", path);
    }

    Ok(sync_config)
}

/// Construct the store, provider and extractor once and wire them into an
/// orchestrator.
pub fn build_orchestrator(config: &AppConfig, sync_config: SyncConfig) -> AppResult<SyncOrchestrator> {
    docsync_engine::open(config, sync_config)
}
