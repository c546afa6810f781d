//! Reset command handler.

use super::{build_orchestrator, load_sync_config};
use clap::Args;
use docsync_core::{config::AppConfig, AppResult};
use std::path::PathBuf;

/// Remove every indexed fragment of a directory
#[derive(Args, Debug)]
pub struct ResetCommand {
    /// Directory whose fragments are removed
    pub root: PathBuf,
}

impl ResetCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing reset command for {:?}", self.root);

        let orchestrator = build_orchestrator(config, load_sync_config(config)?)?;
        let removed = orchestrator.reset(&self.root).await?;

        println!("Removed {} fragments for {}", removed, self.root.display());

        Ok(())
    }
}
