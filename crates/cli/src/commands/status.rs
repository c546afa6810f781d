//! Status command handler.
//!
//! Reports what the index holds for a scan root.

use super::{build_orchestrator, load_sync_config};
use clap::Args;
use docsync_core::{config::AppConfig, AppResult};
use std::path::PathBuf;

/// Show indexed files and fragments for a directory
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Directory that was synced
    pub root: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing status command for {:?}", self.root);

        let orchestrator = build_orchestrator(config, load_sync_config(config)?)?;
        let report = orchestrator.status(&self.root).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("Scan root: {}", report.scan_root);
            println!("Backend:   {}", report.backend);
            println!("Files:     {}", report.stats.files);
            println!("Fragments: {}", report.stats.fragments);
        }

        Ok(())
    }
}
