//! Outcome recorder: the single write path for a task's terminal state.
//!
//! Writes the per-task transcript file and the store update, at most once per
//! task id while the task is being finished. A failed transcript write never
//! blocks the store write; a failed store write can be tried again.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};

use crate::queue_db::{unix_timestamp, ItemId, OutcomeUpdate, QueueStore, TerminalStatus};
use crate::task::TaskId;

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    /// Interrupted by shutdown; the item goes back to the queue.
    Cancelled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Transcripts and identity of a task whose last attempt is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTask {
    pub task_id: TaskId,
    pub item_id: ItemId,
    pub video_code: String,
    pub messages: Vec<String>,
    pub error_messages: Vec<String>,
}

impl FinishedTask {
    /// Transcript file body: messages as JSON, a blank line, then errors.
    pub fn log_artifact(&self) -> Result<String> {
        Ok(format!(
            "{}\n\nerrors: {}",
            serde_json::to_string_pretty(&self.messages)?,
            serde_json::to_string_pretty(&self.error_messages)?
        ))
    }
}

/// Transcript file name `<code>-<task id>.log`, with path separators in the
/// code replaced so it always lands inside the log directory.
pub fn log_file_name(video_code: &str, task_id: &TaskId) -> String {
    let safe: String = video_code
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    format!("{}-{}.log", safe, task_id)
}

pub struct OutcomeRecorder<S> {
    store: Arc<S>,
    log_dir: PathBuf,
    recorded: Mutex<HashSet<TaskId>>,
}

impl<S: QueueStore> OutcomeRecorder<S> {
    pub fn new(store: Arc<S>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            log_dir: log_dir.into(),
            recorded: Mutex::new(HashSet::new()),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Record `outcome` for `task`. Returns `Ok(false)` without touching the
    /// store or the disk if this task id was already recorded; `Err` only
    /// when the store write failed, in which case the id is not kept and the
    /// call may be repeated.
    pub async fn record(&self, task: &FinishedTask, outcome: Outcome) -> Result<bool> {
        let fresh = self.recorded_set().insert(task.task_id.clone());
        if !fresh {
            tracing::debug!(task = %task.task_id, "outcome already recorded; skipping");
            return Ok(false);
        }

        if let Err(e) = self.write_log(task).await {
            tracing::warn!(task = %task.task_id, code = %task.video_code, "transcript not saved: {:#}", e);
        }

        if let Err(e) = self.write_store(task, outcome).await {
            self.forget(&task.task_id);
            return Err(e);
        }

        tracing::info!(
            task = %task.task_id,
            code = %task.video_code,
            outcome = outcome.as_str(),
            "outcome recorded"
        );
        Ok(true)
    }

    /// Drop `task_id` from the recorded set once the task has left the
    /// active set for good.
    pub fn forget(&self, task_id: &TaskId) {
        self.recorded_set().remove(task_id);
    }

    fn recorded_set(&self) -> MutexGuard<'_, HashSet<TaskId>> {
        self.recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn write_store(&self, task: &FinishedTask, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Completed | Outcome::Failed => {
                let status = if outcome == Outcome::Completed {
                    TerminalStatus::Completed
                } else {
                    TerminalStatus::Failed
                };
                let update = OutcomeUpdate {
                    completed_at: unix_timestamp(),
                    message_log: task.messages.join("\n"),
                    error_log: task.error_messages.join("\n"),
                    status,
                };
                self.store
                    .record_outcome(task.item_id, &update)
                    .await
                    .with_context(|| format!("record outcome for item {}", task.item_id))?;
            }
            Outcome::Cancelled => {
                self.store
                    .release(&[task.item_id])
                    .await
                    .with_context(|| format!("release item {}", task.item_id))?;
            }
        }
        Ok(())
    }

    async fn write_log(&self, task: &FinishedTask) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.log_dir)
            .await
            .with_context(|| format!("create {}", self.log_dir.display()))?;
        let path = self
            .log_dir
            .join(log_file_name(&task.video_code, &task.task_id));
        tokio::fs::write(&path, task.log_artifact()?)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_db::{open_memory, FetchMode, NewQueueItem, QueueDb};

    async fn leased_item(db: &QueueDb, code: &str) -> ItemId {
        let ids = db
            .insert_items(&[NewQueueItem::new(code, 100)])
            .await
            .unwrap();
        db.mark_in_progress(&ids, FetchMode::New).await.unwrap();
        ids[0]
    }

    fn finished(item_id: ItemId, code: &str) -> FinishedTask {
        FinishedTask {
            task_id: TaskId::from("task00000001"),
            item_id,
            video_code: code.to_string(),
            messages: vec!["[download] Destination: a.mp4".into()],
            error_messages: vec!["WARNING: slow".into()],
        }
    }

    #[test]
    fn log_artifact_format() {
        let body = finished(1, "abc123").log_artifact().unwrap();
        assert_eq!(
            body,
            "[\n  \"[download] Destination: a.mp4\"\n]\n\nerrors: [\n  \"WARNING: slow\"\n]"
        );
    }

    #[test]
    fn log_file_name_sanitizes_separators() {
        let id = TaskId::from("xyz");
        assert_eq!(log_file_name("abc123", &id), "abc123-xyz.log");
        assert_eq!(log_file_name("../evil", &id), ".._evil-xyz.log");
    }

    #[tokio::test]
    async fn records_completion_and_writes_transcript() {
        let db = Arc::new(open_memory().await.unwrap());
        let id = leased_item(&db, "abc123").await;
        let dir = tempfile::tempdir().unwrap();
        let recorder = OutcomeRecorder::new(Arc::clone(&db), dir.path());

        let task = finished(id, "abc123");
        assert!(recorder.record(&task, Outcome::Completed).await.unwrap());

        let item = db.get_item(id).await.unwrap().expect("item exists");
        assert!(item.completed && !item.failed && !item.downloading);
        assert!(item.completed_at.is_some());
        assert_eq!(item.error_log.as_deref(), Some("WARNING: slow"));
        let path = dir.path().join("abc123-task00000001.log");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn second_record_is_a_noop() {
        let db = Arc::new(open_memory().await.unwrap());
        let id = leased_item(&db, "abc123").await;
        let dir = tempfile::tempdir().unwrap();
        let recorder = OutcomeRecorder::new(Arc::clone(&db), dir.path());
        let task = finished(id, "abc123");

        assert!(recorder.record(&task, Outcome::Failed).await.unwrap());
        let path = dir.path().join("abc123-task00000001.log");
        std::fs::remove_file(&path).unwrap();

        // A late Completed for the same task must not overwrite the failure
        // nor recreate the transcript.
        assert!(!recorder.record(&task, Outcome::Completed).await.unwrap());
        let item = db.get_item(id).await.unwrap().expect("item exists");
        assert!(item.failed && !item.completed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_store_write_can_be_repeated() {
        let db = Arc::new(open_memory().await.unwrap());
        let dir = tempfile::tempdir().unwrap();
        let recorder = OutcomeRecorder::new(Arc::clone(&db), dir.path());
        // No such item yet, so the store write fails.
        let task = finished(1, "abc123");

        assert!(recorder.record(&task, Outcome::Completed).await.is_err());
        assert!(recorder.record(&task, Outcome::Completed).await.is_err());

        let id = leased_item(&db, "abc123").await;
        assert_eq!(id, 1);
        assert!(recorder.record(&task, Outcome::Completed).await.unwrap());
        assert!(db.get_item(id).await.unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn forget_clears_the_recorded_set() {
        let db = Arc::new(open_memory().await.unwrap());
        let id = leased_item(&db, "abc123").await;
        let dir = tempfile::tempdir().unwrap();
        let recorder = OutcomeRecorder::new(Arc::clone(&db), dir.path());
        let task = finished(id, "abc123");

        assert!(recorder.record(&task, Outcome::Completed).await.unwrap());
        assert_eq!(recorder.recorded_set().len(), 1);
        recorder.forget(&task.task_id);
        assert!(recorder.recorded_set().is_empty());
    }

    #[tokio::test]
    async fn cancelled_releases_the_lease() {
        let db = Arc::new(open_memory().await.unwrap());
        let id = leased_item(&db, "abc123").await;
        let dir = tempfile::tempdir().unwrap();
        let recorder = OutcomeRecorder::new(Arc::clone(&db), dir.path());

        assert!(recorder
            .record(&finished(id, "abc123"), Outcome::Cancelled)
            .await
            .unwrap());
        let item = db.get_item(id).await.unwrap().expect("item exists");
        assert!(!item.downloading && !item.is_terminal());
    }

    #[tokio::test]
    async fn unwritable_log_dir_does_not_block_store_write() {
        let db = Arc::new(open_memory().await.unwrap());
        let id = leased_item(&db, "abc123").await;
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the log directory should be.
        let blocked = dir.path().join("not-a-dir");
        std::fs::write(&blocked, b"x").unwrap();
        let recorder = OutcomeRecorder::new(Arc::clone(&db), &blocked);

        assert!(recorder
            .record(&finished(id, "abc123"), Outcome::Completed)
            .await
            .unwrap());
        assert!(db.get_item(id).await.unwrap().unwrap().completed);
    }
}
