//! The queue store contract consumed by the orchestrator.
//!
//! The orchestrator never touches SQL; it only sees this trait, so the store
//! can be swapped (or faked in tests) without touching scheduling code.

use anyhow::Result;
use async_trait::async_trait;

use super::db::QueueDb;
use super::types::{FetchMode, ItemId, OutcomeUpdate, QueueItem};

#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Up to `limit` candidates for `mode`, sorted by priority then queue time,
    /// never returning an id listed in `exclude`.
    async fn fetch_pending(
        &self,
        limit: usize,
        mode: FetchMode,
        exclude: &[ItemId],
    ) -> Result<Vec<QueueItem>>;

    /// Set the mode-appropriate in-progress flag before the items are spawned.
    async fn mark_in_progress(&self, ids: &[ItemId], mode: FetchMode) -> Result<()>;

    /// Single write path for terminal state (completed or failed) plus transcripts.
    async fn record_outcome(&self, id: ItemId, outcome: &OutcomeUpdate) -> Result<()>;

    /// Drop the lease of cancelled items without recording an outcome.
    async fn release(&self, ids: &[ItemId]) -> Result<()>;
}

#[async_trait]
impl QueueStore for QueueDb {
    async fn fetch_pending(
        &self,
        limit: usize,
        mode: FetchMode,
        exclude: &[ItemId],
    ) -> Result<Vec<QueueItem>> {
        QueueDb::fetch_pending(self, limit, mode, exclude).await
    }

    async fn mark_in_progress(&self, ids: &[ItemId], mode: FetchMode) -> Result<()> {
        QueueDb::mark_in_progress(self, ids, mode).await
    }

    async fn record_outcome(&self, id: ItemId, outcome: &OutcomeUpdate) -> Result<()> {
        QueueDb::record_outcome(self, id, outcome).await
    }

    async fn release(&self, ids: &[ItemId]) -> Result<()> {
        QueueDb::release(self, ids).await
    }
}
