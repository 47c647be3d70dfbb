//! Claiming queue items into the active set.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::orchestrator::{Control, Orchestrator};
use crate::queue_db::{FetchMode, ItemId, QueueItem, QueueStore};
use crate::supervisor::Launcher;
use crate::task::{Phase, TaskId, TaskRecord};

/// Two empty fetches in a row (one per mode) means the queue has nothing for us.
const DRAINED_AFTER_EMPTY_FETCHES: u32 = 2;

/// Fetch up to `limit` eligible items and lease them in one go.
async fn claim<S: QueueStore>(
    store: &S,
    limit: usize,
    mode: FetchMode,
    exclude: &[ItemId],
) -> Result<Vec<QueueItem>> {
    let mut items = store
        .fetch_pending(limit, mode, exclude)
        .await
        .with_context(|| format!("fetch pending items ({})", mode))?;
    items.truncate(limit);
    if !items.is_empty() {
        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        store
            .mark_in_progress(&ids, mode)
            .await
            .with_context(|| format!("mark {} items in progress", ids.len()))?;
    }
    Ok(items)
}

impl<S: QueueStore, L: Launcher> Orchestrator<S, L> {
    /// Top the active set up to `max_concurrent`. No-op while shutting down,
    /// while another fetch is outstanding or when the set is already full.
    pub(super) fn refill(&mut self) {
        if self.shutting_down || self.fetch_in_flight {
            return;
        }
        let active = self.tasks.len();
        if active >= self.cfg.max_concurrent {
            return;
        }
        let limit = self.cfg.max_concurrent - active;
        let mode = self.mode;
        let exclude: Vec<ItemId> = self.tasks.values().map(|t| t.item_id).collect();

        tracing::debug!(limit, %mode, "refilling");
        self.fetch_in_flight = true;

        let store = Arc::clone(&self.store);
        let tx = self.control_tx.clone();
        tokio::spawn(async move {
            let result = claim(store.as_ref(), limit, mode, &exclude).await;
            let _ = tx.send(Control::Fetched { mode, result }).await;
        });
    }

    pub(super) fn on_fetched(&mut self, mode: FetchMode, result: Result<Vec<QueueItem>>) {
        self.fetch_in_flight = false;

        let items = match result {
            Ok(items) => items,
            Err(e) => {
                // Try again on the next settle or idle tick.
                tracing::warn!(%mode, "refill aborted: {:#}", e);
                return;
            }
        };

        if self.shutting_down {
            self.release_unclaimed(items);
            return;
        }

        if items.is_empty() {
            self.empty_fetches += 1;
            self.mode = mode.flipped();
            tracing::debug!(
                empty = %mode,
                next = %self.mode,
                streak = self.empty_fetches,
                "nothing to fetch"
            );
            if self.empty_fetches < DRAINED_AFTER_EMPTY_FETCHES {
                self.refill();
            } else if self.cfg.exit_when_drained && self.tasks.is_empty() {
                tracing::info!("queue drained");
                self.begin_shutdown();
            }
            return;
        }
        self.empty_fetches = 0;

        let capacity = self.cfg.max_concurrent.saturating_sub(self.tasks.len());
        let mut items = items;
        if items.len() > capacity {
            let overflow = items.split_off(capacity);
            self.release_unclaimed(overflow);
        }

        for (i, item) in items.iter().enumerate() {
            let record = TaskRecord::new(item, mode, self.root.child_token());
            let task_id = record.task_id.clone();
            tracing::info!(task = %task_id, code = %item.code, %mode, "claimed");
            self.tasks.insert(task_id.clone(), record);
            let delay = self.cfg.spawn_stagger.saturating_mul(i as u32);
            self.send_later(delay, Control::SpawnDue(task_id));
        }
    }

    /// Hand leased items that never became tasks back to the queue. The run
    /// loop does not exit while a release is outstanding.
    fn release_unclaimed(&mut self, items: Vec<QueueItem>) {
        if items.is_empty() {
            return;
        }
        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        self.pending_releases += 1;
        let store = Arc::clone(&self.store);
        let tx = self.control_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = store.release(&ids).await {
                tracing::warn!(?ids, "release of unclaimed items failed: {:#}", e);
            }
            let _ = tx.send(Control::Released).await;
        });
    }

    pub(super) fn on_spawn_due(&mut self, task_id: &TaskId) {
        let Some(task) = self.tasks.get(task_id) else {
            return;
        };
        if task.phase != Phase::Waiting || task.attempt != 0 {
            return;
        }
        self.start_attempt(task_id);
    }
}
