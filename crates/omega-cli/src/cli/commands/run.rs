//! `omega run` – drive the queue with the orchestrator until stopped.

use anyhow::Result;
use omega_core::config::OmegaConfig;
use omega_core::control::default_control_socket_path;
use omega_core::queue_db::QueueDb;
use omega_core::scheduler::{Orchestrator, OrchestratorConfig, OrchestratorHandle};
use omega_core::status::run_status_reporter;
use omega_core::supervisor::ProcessLauncher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cli::control_socket;

/// Flags of `omega run`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub jobs: Option<usize>,
    pub exit_when_drained: bool,
    pub quiet: bool,
}

pub async fn run_orchestrator(db: QueueDb, cfg: &OmegaConfig, opts: RunOptions) -> Result<()> {
    let recovered = db.recover_retrying_items().await?;
    if recovered > 0 {
        tracing::info!("recovered {} item(s) left retrying by a previous run", recovered);
    }

    let mut orch_cfg = OrchestratorConfig::from_config(cfg);
    if let Some(jobs) = opts.jobs {
        orch_cfg.max_concurrent = jobs.max(1);
    }
    orch_cfg.exit_when_drained = opts.exit_when_drained;

    let log_dir = cfg.resolved_log_dir()?;
    tracing::debug!(log_dir = %log_dir.display(), "transcripts directory");
    let launcher = Arc::new(ProcessLauncher::from_config(cfg));
    let orchestrator = Orchestrator::new(orch_cfg, Arc::new(db), launcher, log_dir);
    let handle = orchestrator.handle();

    let socket_path = default_control_socket_path().ok();
    let listener = socket_path.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(handle.clone(), path) {
            Ok(task) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(task)
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        }
    });

    let reporter_stop = CancellationToken::new();
    let reporter = (!opts.quiet).then(|| {
        tokio::spawn(run_status_reporter(
            orchestrator.subscribe_status(),
            cfg.status_interval(),
            reporter_stop.clone(),
        ))
    });

    let interrupt = tokio::spawn(shutdown_on_interrupt(handle));
    let result = orchestrator.run().await;

    interrupt.abort();
    reporter_stop.cancel();
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    if let Some(listener) = listener {
        listener.abort();
        if let Some(path) = &socket_path {
            let _ = std::fs::remove_file(path);
        }
    }

    let summary = result?;
    println!(
        "Completed {}, failed {}, cancelled {} ({} relaunches)",
        summary.completed, summary.failed, summary.cancelled, summary.relaunches
    );
    if summary.unsaved > 0 {
        println!(
            "{} outcome(s) could not be saved; their items are picked up again after a restart",
            summary.unsaved
        );
    } else if summary.store_errors > 0 {
        println!(
            "{} outcome(s) were saved only after the store recovered",
            summary.store_errors
        );
    }
    Ok(())
}

/// First Ctrl-C asks for a graceful shutdown; a second one exits immediately.
async fn shutdown_on_interrupt(handle: OrchestratorHandle) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!("interrupt received; shutting down");
    eprintln!("Shutting down (Ctrl-C again to force)...");
    let _ = handle.shutdown().await;

    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("second interrupt; exiting without cleanup");
        std::process::exit(130);
    }
}
