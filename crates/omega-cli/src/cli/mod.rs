//! CLI for the omega download orchestrator.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use omega_core::config;
use omega_core::queue_db::QueueDb;

use commands::{run_add, run_cancel, run_orchestrator, run_shutdown, run_status, RunOptions};

/// Top-level CLI for the omega download orchestrator.
#[derive(Debug, Parser)]
#[command(name = "omega")]
#[command(about = "omega: queue-driven video download orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue one or more video codes for download.
    Add {
        /// Video or playlist codes (the `v=` part of the watch URL).
        #[arg(required = true, value_name = "CODE")]
        codes: Vec<String>,
        /// Lower runs first. Defaults to `default_priority` from the config.
        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        priority: Option<i64>,
    },

    /// Download queued items until interrupted (Ctrl-C stops gracefully).
    Run {
        /// Maximum concurrent downloads (overrides `max_concurrent_downloads`).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Exit once no new or stalled items are left.
        #[arg(long)]
        exit_when_drained: bool,
        /// Do not draw the status console.
        #[arg(long)]
        quiet: bool,
    },

    /// Show queued and in-progress items.
    Status {
        /// Include completed and failed items.
        #[arg(long)]
        all: bool,
    },

    /// Cancel the active downloads of a video code in a running `omega run`.
    Cancel {
        /// Video code to cancel.
        code: String,
    },

    /// Ask a running `omega run` to stop gracefully.
    Shutdown,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Add { codes, priority } => {
                let db = QueueDb::open_default().await?;
                run_add(&db, &codes, priority.unwrap_or(cfg.default_priority)).await?;
            }
            CliCommand::Run {
                jobs,
                exit_when_drained,
                quiet,
            } => {
                let db = QueueDb::open_default().await?;
                let opts = RunOptions {
                    jobs,
                    exit_when_drained,
                    quiet,
                };
                run_orchestrator(db, &cfg, opts).await?;
            }
            CliCommand::Status { all } => {
                let db = QueueDb::open_default().await?;
                run_status(&db, all).await?;
            }
            CliCommand::Cancel { code } => run_cancel(&code).await?,
            CliCommand::Shutdown => run_shutdown().await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
