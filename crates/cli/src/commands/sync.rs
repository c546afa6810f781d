//! Sync command handler.
//!
//! Runs one sync of a directory, or prints the change plan with `--dry-run`.

use super::{build_orchestrator, load_sync_config};
use clap::Args;
use docsync_core::{config::AppConfig, AppResult};
use docsync_engine::{PlanReport, ProgressReporter, SyncSummary};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sync a directory into the vector index
#[derive(Args, Debug)]
pub struct SyncCommand {
    /// Directory to sync
    pub root: PathBuf,

    /// Compute and print the change plan without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Files processed concurrently (overrides sync.concurrency)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Print progress events to stderr
    #[arg(long)]
    pub progress: bool,
}

impl SyncCommand {
    pub async fn execute(&self, config: &AppConfig, cancel: &CancellationToken) -> AppResult<()> {
        tracing::info!("Executing sync command for {:?}", self.root);

        let mut sync_config = load_sync_config(config)?;
        if let Some(concurrency) = self.concurrency {
            sync_config.concurrency = concurrency;
        }

        let mut orchestrator = build_orchestrator(config, sync_config)?;
        if self.progress {
            orchestrator = orchestrator.with_progress(ProgressReporter::new(Arc::new(|event| {
                eprintln!("{}", event.format_simple());
            })));
        }

        if self.dry_run {
            let report = orchestrator.plan(&self.root).await?;
            self.print_plan(&report)?;
            return Ok(());
        }

        // Per-file failures are reported, not returned; only fatal errors fail the command
        let summary = orchestrator.run(&self.root, cancel).await?;
        self.print_summary(&summary)
    }

    fn print_plan(&self, report: &PlanReport) -> AppResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }

        let counts = report.plan.counts();
        println!("Plan for {}", report.scan_root);
        println!(
            "  {} unchanged, {} added, {} updated, {} deleted",
            counts.unchanged, counts.added, counts.updated, counts.deleted
        );
        for (label, paths) in [
            ("add", &report.plan.added),
            ("update", &report.plan.updated),
            ("delete", &report.plan.deleted),
        ] {
            for path in paths {
                println!("  {:<6} {}", label, path);
            }
        }
        for failure in &report.failures {
            println!("  skip   {} ({}: {})", failure.path, failure.kind.as_str(), failure.reason);
        }

        Ok(())
    }

    fn print_summary(&self, summary: &SyncSummary) -> AppResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(summary)?);
            return Ok(());
        }

        println!(
            "Synced {} in {:.2}s (run {})",
            summary.scan_root, summary.duration_secs, summary.run_id
        );
        println!(
            "  files: {} added, {} updated, {} deleted, {} unchanged",
            summary.files_added, summary.files_updated, summary.files_deleted, summary.planned.unchanged
        );
        println!(
            "  fragments: {} written, {} removed",
            summary.fragments_added, summary.fragments_removed
        );

        if !summary.failures.is_empty() {
            println!("Failures ({}):", summary.failures.len());
            for failure in &summary.failures {
                println!("  {} [{}] {}", failure.path, failure.kind.as_str(), failure.reason);
            }
        }

        if summary.cancelled {
            println!(
                "Cancelled: {} files left pending for the next run",
                summary.pending.len()
            );
        }

        Ok(())
    }
}
