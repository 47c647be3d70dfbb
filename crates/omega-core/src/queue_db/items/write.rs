//! Item write operations: insert, claim, outcome, release, recovery.

use anyhow::Result;

use super::super::db::{unix_timestamp, QueueDb};
use super::super::types::{
    FetchMode, ItemId, NewQueueItem, OutcomeUpdate, QueueError, TerminalStatus,
};

impl QueueDb {
    /// Insert new queued items in one transaction. Rejects the whole batch if
    /// any code is empty.
    pub async fn insert_items(&self, items: &[NewQueueItem]) -> Result<Vec<ItemId>> {
        if items.iter().any(|i| i.code.trim().is_empty()) {
            return Err(QueueError::EmptyCode.into());
        }

        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = sqlx::query(
                r#"
                INSERT INTO queue_items (code, priority, queued_at)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(item.code.trim())
            .bind(item.priority)
            .bind(item.queued_at.unwrap_or(now))
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            ids.push(id);
        }
        tx.commit().await?;

        Ok(ids)
    }

    /// Set the in-progress flag for `mode` on every id, atomically.
    ///
    /// `New` sets `downloading`; `Stalled` moves the lease from `downloading`
    /// to `retrying` so at most one of them is set. Terminal rows are left alone.
    pub async fn mark_in_progress(&self, ids: &[ItemId], mode: FetchMode) -> Result<()> {
        let (downloading, retrying) = match mode {
            FetchMode::New => (true, false),
            FetchMode::Stalled => (false, true),
        };

        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(
                r#"
                UPDATE queue_items
                SET downloading = ?1,
                    retrying = ?2
                WHERE id = ?3 AND completed = 0 AND failed = 0
                "#,
            )
            .bind(downloading)
            .bind(retrying)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Write the terminal outcome of an item and drop its lease.
    pub async fn record_outcome(&self, id: ItemId, outcome: &OutcomeUpdate) -> Result<()> {
        let completed = outcome.status == TerminalStatus::Completed;
        let r = sqlx::query(
            r#"
            UPDATE queue_items
            SET completed = ?1,
                failed = ?2,
                completed_at = ?3,
                message_log = ?4,
                error_log = ?5,
                downloading = 0,
                retrying = 0
            WHERE id = ?6
            "#,
        )
        .bind(completed)
        .bind(!completed)
        .bind(outcome.completed_at)
        .bind(&outcome.message_log)
        .bind(&outcome.error_log)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if r.rows_affected() == 0 {
            anyhow::bail!("queue item {} not found", id);
        }
        Ok(())
    }

    /// Clear both in-progress flags so the items go back to the fresh queue.
    pub async fn release(&self, ids: &[ItemId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(
                r#"
                UPDATE queue_items
                SET downloading = 0,
                    retrying = 0
                WHERE id = ?1 AND completed = 0 AND failed = 0
                "#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Move items left `retrying` by a crashed run back to `downloading`, so the
    /// stalled refill mode can pick them up again. Call once before the
    /// orchestrator starts. Returns the number of items moved.
    pub async fn recover_retrying_items(&self) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE queue_items
            SET retrying = 0,
                downloading = 1
            WHERE retrying = 1 AND completed = 0 AND failed = 0
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}
