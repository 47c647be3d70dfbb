//! Item read operations: list, get, and the refill candidate query.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::super::db::QueueDb;
use super::super::types::{FetchMode, ItemId, QueueItem};

const ITEM_COLUMNS: &str = "id, code, priority, queued_at, downloading, retrying, completed, \
     failed, completed_at, message_log, error_log";

fn item_from_row(row: &SqliteRow) -> QueueItem {
    QueueItem {
        id: row.get("id"),
        code: row.get("code"),
        priority: row.get("priority"),
        queued_at: row.get("queued_at"),
        downloading: row.get("downloading"),
        retrying: row.get("retrying"),
        completed: row.get("completed"),
        failed: row.get("failed"),
        completed_at: row.get("completed_at"),
        message_log: row.get("message_log"),
        error_log: row.get("error_log"),
    }
}

impl QueueDb {
    /// List items in queue order (priority, then age). Terminal items are
    /// skipped unless `include_terminal` is set.
    pub async fn list_items(&self, include_terminal: bool) -> Result<Vec<QueueItem>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {ITEM_COLUMNS} FROM queue_items"));
        if !include_terminal {
            qb.push(" WHERE completed = 0 AND failed = 0");
        }
        qb.push(" ORDER BY priority ASC, queued_at ASC, id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(item_from_row).collect())
    }

    /// Fetch a single item by id.
    pub async fn get_item(&self, id: ItemId) -> Result<Option<QueueItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(item_from_row))
    }

    /// Refill candidates for `mode`, most urgent first.
    ///
    /// `New` selects items that were never claimed; `Stalled` selects items
    /// left `downloading` without an outcome. Ids in `exclude` (tasks active in
    /// this process) are never returned.
    pub async fn fetch_pending(
        &self,
        limit: usize,
        mode: FetchMode,
        exclude: &[ItemId],
    ) -> Result<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items \
             WHERE completed = 0 AND failed = 0 AND retrying = 0 AND downloading = "
        ));
        qb.push_bind(mode == FetchMode::Stalled);
        if !exclude.is_empty() {
            qb.push(" AND id NOT IN (");
            let mut ids = qb.separated(", ");
            for id in exclude {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }
        qb.push(" ORDER BY priority ASC, queued_at ASC, id ASC LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(item_from_row).collect())
    }
}
