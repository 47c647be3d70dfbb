//! Attempt lifecycle inside the dispatcher: launch, observe output, act on
//! the exit, hand the finished task to the recorder.

use std::sync::Arc;

use super::orchestrator::{Control, Orchestrator};
use crate::queue_db::QueueStore;
use crate::recorder::{FinishedTask, Outcome};
use crate::retry::{classify, RetryDecision};
use crate::supervisor::{AttemptEvent, AttemptEventKind, LaunchRequest, Launcher, LineStream};
use crate::task::{Phase, TaskId};

const CANCELLED_BY_OPERATOR: &str = "cancelled by operator";

impl<S: QueueStore, L: Launcher> Orchestrator<S, L> {
    pub(super) fn on_attempt_event(&mut self, event: AttemptEvent) {
        let AttemptEvent {
            task_id,
            attempt,
            kind,
        } = event;
        match kind {
            AttemptEventKind::Line { stream, line } => self.on_line(&task_id, attempt, stream, line),
            AttemptEventKind::Exited { code } => self.on_exit(&task_id, attempt, code),
        }
    }

    fn on_line(&mut self, task_id: &TaskId, attempt: u32, stream: LineStream, line: String) {
        let class = classify(&line);
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if task.attempt != attempt || task.phase != Phase::Running {
            tracing::trace!(task = %task_id, attempt, "line from stale attempt");
            return;
        }
        task.observe_line(stream, line, class);

        // Only the first retryable line of an attempt counts.
        if !class.is_retryable() || task.verdict.is_some() || task.cancel.is_cancelled() {
            return;
        }
        let decision = self.cfg.retry.decide(task, class);
        let mut relaunch_in = None;
        match &decision {
            RetryDecision::Continue => return,
            RetryDecision::Relaunch {
                reason,
                delay,
                extra_args,
            } => {
                task.mark_retried(*reason);
                task.extra_args.clone_from(extra_args);
                relaunch_in = Some(*delay);
                tracing::info!(
                    task = %task_id,
                    code = %task.video_code,
                    attempt,
                    "{} -- relaunching in {:?}",
                    reason,
                    delay
                );
            }
            RetryDecision::GiveUp(reason) => {
                tracing::warn!(
                    task = %task_id,
                    code = %task.video_code,
                    attempt,
                    "{} again -- giving up",
                    reason
                );
                // The attempt is fatal; its exit records the failure.
                if let Some(token) = &task.attempt_cancel {
                    token.cancel();
                }
            }
        }
        task.verdict = Some(decision);

        if let Some(delay) = relaunch_in {
            self.send_later(
                delay,
                Control::RelaunchDue {
                    task_id: task_id.clone(),
                    attempt,
                },
            );
        }
    }

    fn on_exit(&mut self, task_id: &TaskId, attempt: u32, code: Option<i32>) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if task.attempt != attempt || task.phase != Phase::Running {
            tracing::debug!(task = %task_id, attempt, "exit from stale attempt");
            return;
        }
        tracing::debug!(task = %task_id, attempt, ?code, "downloader exited");
        task.attempt_cancel = None;

        let outcome = if task.cancel.is_cancelled() {
            if self.shutting_down {
                Outcome::Cancelled
            } else {
                Outcome::Failed
            }
        } else {
            match task.verdict.as_ref() {
                Some(RetryDecision::Relaunch { reason, .. }) => {
                    // RelaunchDue is already scheduled.
                    task.phase = Phase::Waiting;
                    task.most_recent_line = format!("{} -- waiting to relaunch", reason);
                    return;
                }
                Some(RetryDecision::GiveUp(_)) => Outcome::Failed,
                _ if code == Some(0) => Outcome::Completed,
                _ => {
                    match code {
                        Some(c) => task.error_messages.push(format!("downloader exited with code {}", c)),
                        None => task.error_messages.push("downloader killed by signal".to_string()),
                    }
                    Outcome::Failed
                }
            }
        };
        self.finish(task_id, outcome);
    }

    /// Start the next attempt once the backoff after a retryable line has
    /// elapsed, killing the previous process if it is still running. This is
    /// the only path that launches an already-launched task again.
    pub(super) fn relaunch(&mut self, task_id: &TaskId, attempt: u32) {
        if self.shutting_down {
            return;
        }
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if task.attempt != attempt
            || task.cancel.is_cancelled()
            || !matches!(task.verdict, Some(RetryDecision::Relaunch { .. }))
        {
            return;
        }
        match task.phase {
            Phase::Finishing => return,
            Phase::Waiting => {}
            Phase::Running => {
                tracing::debug!(task = %task_id, attempt, "previous attempt still running; killing it");
                if let Some(token) = task.attempt_cancel.take() {
                    token.cancel();
                }
            }
        }
        self.summary.relaunches += 1;
        self.start_attempt(task_id);
    }

    pub(super) fn start_attempt(&mut self, task_id: &TaskId) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        task.attempt += 1;
        task.phase = Phase::Running;
        task.verdict = None;
        task.most_recent_line = "spawned".to_string();
        let token = task.cancel.child_token();
        task.attempt_cancel = Some(token.clone());
        let request = LaunchRequest {
            task_id: task.task_id.clone(),
            attempt: task.attempt,
            video_code: task.video_code.clone(),
            extra_args: task.extra_args.clone(),
            cancel: token,
        };
        tracing::info!(
            task = %task_id,
            code = %request.video_code,
            attempt = request.attempt,
            extra_args = ?request.extra_args,
            "launching"
        );

        if let Err(e) = self.launcher.launch(request, self.attempt_tx.clone()) {
            tracing::error!(task = %task_id, "launch failed: {}", e);
            if let Some(task) = self.tasks.get_mut(task_id) {
                task.attempt_cancel = None;
                task.error_messages.push(e.to_string());
                task.most_recent_line = e.to_string();
            }
            self.finish(task_id, Outcome::Failed);
        }
    }

    /// Hand the task to the recorder. The task stays in the active set (and
    /// counts against the limit) until `Control::Recorded` comes back.
    pub(super) fn finish(&mut self, task_id: &TaskId, outcome: Outcome) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if task.phase == Phase::Finishing {
            return;
        }
        task.phase = Phase::Finishing;
        task.verdict = None;
        task.most_recent_line = format!("{} -- recording", outcome.as_str());
        let finished = task.take_finished();
        self.spawn_record(finished, outcome);
    }

    /// Record on a spawned task and report back with `Control::Recorded`.
    pub(super) fn spawn_record(&self, finished: FinishedTask, outcome: Outcome) {
        let recorder = Arc::clone(&self.recorder);
        let tx = self.control_tx.clone();
        tokio::spawn(async move {
            let stored = match recorder.record(&finished, outcome).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(
                        task = %finished.task_id,
                        code = %finished.video_code,
                        "recording {} failed: {:#}",
                        outcome.as_str(),
                        e
                    );
                    false
                }
            };
            let _ = tx
                .send(Control::Recorded {
                    task: finished,
                    outcome,
                    stored,
                })
                .await;
        });
    }

    /// Finish every task that has no process running right now.
    pub(super) fn finish_waiting_tasks(&mut self, outcome: Outcome) {
        let waiting: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.phase == Phase::Waiting)
            .map(|t| t.task_id.clone())
            .collect();
        for task_id in waiting {
            self.finish(&task_id, outcome);
        }
    }

    /// Cancel the active tasks for `video_code`. Running attempts are killed
    /// and fail on exit; waiting tasks fail right away.
    pub(super) fn cancel_code(&mut self, video_code: &str) -> usize {
        let mut waiting = Vec::new();
        let mut matched = 0;
        for task in self.tasks.values_mut() {
            if task.video_code != video_code
                || task.phase == Phase::Finishing
                || task.cancel.is_cancelled()
            {
                continue;
            }
            matched += 1;
            task.error_messages.push(CANCELLED_BY_OPERATOR.to_string());
            task.cancel.cancel();
            tracing::info!(task = %task.task_id, code = %video_code, "cancel requested");
            if task.phase == Phase::Waiting {
                waiting.push(task.task_id.clone());
            }
        }
        for task_id in waiting {
            self.finish(&task_id, Outcome::Failed);
        }
        matched
    }
}
