//! The dispatcher: one task that owns the active set and serializes every
//! decision about it.
//!
//! Launchers, the fetch task, recorder tasks, timers and the public handle
//! only ever talk to it through channels.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::OmegaConfig;
use crate::queue_db::{FetchMode, QueueItem, QueueStore};
use crate::recorder::{FinishedTask, Outcome, OutcomeRecorder};
use crate::retry::RetryPolicy;
use crate::status::StatusSnapshot;
use crate::supervisor::{AttemptEvent, Launcher};
use crate::task::{TaskId, TaskRecord};

const CHANNEL_CAPACITY: usize = 1024;

/// Orchestrator tuning, usually derived from `OmegaConfig`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on the active task set.
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub refill_settle: Duration,
    pub spawn_stagger: Duration,
    pub refill_interval: Duration,
    /// Stop once both fetch modes come back empty and nothing is active.
    pub exit_when_drained: bool,
}

impl OrchestratorConfig {
    pub fn from_config(cfg: &OmegaConfig) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent_downloads.max(1),
            retry: RetryPolicy {
                backoff: cfg.retry_backoff(),
                format_override_args: cfg.format_override_args.clone(),
            },
            refill_settle: cfg.refill_settle(),
            spawn_stagger: cfg.spawn_stagger(),
            refill_interval: cfg.refill_interval(),
            exit_when_drained: false,
        }
    }
}

/// Counters returned by `Orchestrator::run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
    /// In-place relaunches after retryable errors.
    pub relaunches: u32,
    /// Outcomes whose first store write failed. They are written again on
    /// the idle tick.
    pub store_errors: u32,
    /// Outcomes still unsaved when the run stopped. Their items stay leased
    /// until the next start recovers them.
    pub unsaved: u32,
}

/// Messages for the dispatcher other than process output.
#[derive(Debug)]
pub(crate) enum Control {
    Refill,
    Fetched {
        mode: FetchMode,
        result: Result<Vec<QueueItem>>,
    },
    SpawnDue(TaskId),
    RelaunchDue {
        task_id: TaskId,
        attempt: u32,
    },
    Recorded {
        task: FinishedTask,
        outcome: Outcome,
        stored: bool,
    },
    Released,
    Cancel {
        video_code: String,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Cloneable remote control for a running orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Control>,
}

impl OrchestratorHandle {
    /// Cancel every active task downloading `video_code`. Cancelled tasks are
    /// recorded as failed. Returns how many tasks matched.
    pub async fn cancel(&self, video_code: &str) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Cancel {
            video_code: video_code.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| anyhow!("orchestrator stopped before answering"))
    }

    /// Kill running downloads, return their items to the queue and stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Control::Shutdown).await
    }

    /// Ask for a refill now instead of waiting for the idle timer.
    pub async fn refill(&self) -> Result<()> {
        self.send(Control::Refill).await
    }

    async fn send(&self, msg: Control) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("orchestrator is not running"))
    }
}

pub struct Orchestrator<S: QueueStore, L: Launcher> {
    pub(super) cfg: OrchestratorConfig,
    pub(super) store: Arc<S>,
    pub(super) launcher: Arc<L>,
    pub(super) recorder: Arc<OutcomeRecorder<S>>,
    /// The active task set.
    pub(super) tasks: HashMap<TaskId, TaskRecord>,
    pub(super) mode: FetchMode,
    pub(super) fetch_in_flight: bool,
    /// Releases of over-fetched items still talking to the store.
    pub(super) pending_releases: usize,
    /// Consecutive fetches that returned nothing (across both modes).
    pub(super) empty_fetches: u32,
    pub(super) shutting_down: bool,
    /// Finished tasks whose outcome write failed, waiting for the idle tick.
    pub(super) unsaved: Vec<(FinishedTask, Outcome)>,
    /// Rewrites of `unsaved` outcomes still talking to the store.
    pub(super) resaves_in_flight: usize,
    pub(super) root: CancellationToken,
    pub(super) control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    pub(super) attempt_tx: mpsc::Sender<AttemptEvent>,
    attempt_rx: mpsc::Receiver<AttemptEvent>,
    status_tx: watch::Sender<StatusSnapshot>,
    pub(super) summary: RunSummary,
}

impl<S: QueueStore, L: Launcher> Orchestrator<S, L> {
    pub fn new(
        cfg: OrchestratorConfig,
        store: Arc<S>,
        launcher: Arc<L>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        let recorder = Arc::new(OutcomeRecorder::new(Arc::clone(&store), log_dir));
        let (control_tx, control_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (attempt_tx, attempt_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        Self {
            cfg,
            store,
            launcher,
            recorder,
            tasks: HashMap::new(),
            mode: FetchMode::New,
            fetch_in_flight: false,
            pending_releases: 0,
            empty_fetches: 0,
            shutting_down: false,
            unsaved: Vec::new(),
            resaves_in_flight: 0,
            root: CancellationToken::new(),
            control_tx,
            control_rx,
            attempt_tx,
            attempt_rx,
            status_tx,
            summary: RunSummary::default(),
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            tx: self.control_tx.clone(),
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Drive the queue until shut down (or drained, if configured).
    pub async fn run(mut self) -> Result<RunSummary> {
        tracing::info!(
            max_concurrent = self.cfg.max_concurrent,
            exit_when_drained = self.cfg.exit_when_drained,
            "orchestrator started"
        );

        self.refill();
        self.publish_status();

        let period = self.cfg.refill_interval;
        let mut idle = tokio::time::interval_at(Instant::now() + period, period);
        idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(event) = self.attempt_rx.recv() => self.on_attempt_event(event),
                Some(msg) = self.control_rx.recv() => self.on_control(msg),
                _ = idle.tick() => {
                    tracing::trace!("idle tick");
                    self.retry_unsaved();
                    self.refill();
                }
            }
            self.publish_status();

            if self.is_done() {
                break;
            }
        }

        tracing::info!(summary = ?self.summary, "orchestrator stopped");
        Ok(self.summary)
    }

    fn is_done(&self) -> bool {
        self.shutting_down
            && self.tasks.is_empty()
            && !self.fetch_in_flight
            && self.pending_releases == 0
            && self.unsaved.is_empty()
            && self.resaves_in_flight == 0
    }

    fn on_control(&mut self, msg: Control) {
        match msg {
            Control::Refill => self.refill(),
            Control::Fetched { mode, result } => self.on_fetched(mode, result),
            Control::SpawnDue(task_id) => self.on_spawn_due(&task_id),
            Control::RelaunchDue { task_id, attempt } => self.relaunch(&task_id, attempt),
            Control::Recorded {
                task,
                outcome,
                stored,
            } => self.on_recorded(task, outcome, stored),
            Control::Released => {
                self.pending_releases = self.pending_releases.saturating_sub(1);
            }
            Control::Cancel { video_code, reply } => {
                let n = self.cancel_code(&video_code);
                let _ = reply.send(n);
            }
            Control::Shutdown => self.begin_shutdown(),
        }
    }

    /// Deliver `msg` to ourselves after `delay`, from a detached timer task.
    pub(super) fn send_later(&self, delay: Duration, msg: Control) {
        let tx = self.control_tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(msg).await;
        });
    }

    pub(super) fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        tracing::info!(active = self.tasks.len(), "shutting down");
        self.shutting_down = true;
        self.root.cancel();
        self.finish_waiting_tasks(Outcome::Cancelled);
        self.retry_unsaved();
    }

    fn on_recorded(&mut self, task: FinishedTask, outcome: Outcome, stored: bool) {
        let first_write = self.tasks.remove(&task.task_id).is_some();
        if first_write {
            match outcome {
                Outcome::Completed => self.summary.completed += 1,
                Outcome::Failed => self.summary.failed += 1,
                Outcome::Cancelled => self.summary.cancelled += 1,
            }
            if !stored {
                self.summary.store_errors += 1;
            }
            if !self.shutting_down {
                self.send_later(self.cfg.refill_settle, Control::Refill);
            }
        } else {
            self.resaves_in_flight = self.resaves_in_flight.saturating_sub(1);
        }

        if stored {
            self.recorder.forget(&task.task_id);
            if !first_write {
                tracing::info!(task = %task.task_id, code = %task.video_code, "outcome saved on rewrite");
            }
        } else if self.shutting_down && !first_write {
            tracing::error!(
                task = %task.task_id,
                code = %task.video_code,
                "outcome not saved before shutdown; item stays leased until the next start"
            );
            self.summary.unsaved += 1;
        } else {
            self.unsaved.push((task, outcome));
            if self.shutting_down {
                self.retry_unsaved();
            }
        }
    }

    /// Write the outcomes whose store write failed again. During shutdown each
    /// gets one last try.
    fn retry_unsaved(&mut self) {
        for (task, outcome) in std::mem::take(&mut self.unsaved) {
            tracing::debug!(task = %task.task_id, code = %task.video_code, "rewriting outcome");
            self.resaves_in_flight += 1;
            self.spawn_record(task, outcome);
        }
    }

    fn publish_status(&self) {
        let mut tasks: Vec<_> = self.tasks.values().map(TaskRecord::status).collect();
        tasks.sort_by(|a, b| {
            a.video_code
                .cmp(&b.video_code)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        self.status_tx.send_replace(StatusSnapshot {
            mode: self.mode,
            fetch_in_flight: self.fetch_in_flight,
            shutting_down: self.shutting_down,
            tasks,
        });
    }
}
