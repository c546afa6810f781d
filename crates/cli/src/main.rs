//! docsync CLI
//!
//! Main entry point for the docsync command-line tool.
//! Keeps a vector index in sync with a directory of documents.

mod commands;

use clap::{Parser, Subcommand};
use commands::{ResetCommand, StatusCommand, SyncCommand};
use docsync_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// docsync - incremental document sync for vector indexes
#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(about = "Incremental document ingestion and vector index sync", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "DOCSYNC_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "DOCSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync a directory into the vector index
    Sync(SyncCommand),

    /// Show what the index holds for a directory
    Status(StatusCommand),

    /// Remove every indexed fragment of a directory
    Reset(ResetCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from environment
    let config = AppConfig::load()?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.log_level,
        cli.verbose,
        cli.no_color,
        cli.json_logs,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color, config.json_logs)?;

    tracing::info!("docsync starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Config file: {:?}", config.config_path());

    let command_name = match &cli.command {
        Commands::Sync(_) => "sync",
        Commands::Status(_) => "status",
        Commands::Reset(_) => "reset",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Ctrl-C stops the run between files; what was not reached stays pending
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight files");
            signal_token.cancel();
        }
    });

    let result = match cli.command {
        Commands::Sync(cmd) => cmd.execute(&config, &cancel).await,
        Commands::Status(cmd) => cmd.execute(&config).await,
        Commands::Reset(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
