//! In-memory record of one logical download task.
//!
//! A task lives from the moment a refill claims its queue item until its
//! outcome is recorded. Relaunches after retryable errors reuse the record:
//! same id, same transcripts, bumped `attempt`.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::queue_db::{FetchMode, ItemId, QueueItem};
use crate::recorder::FinishedTask;
use crate::retry::{LineClass, RetryDecision, RetryReason};
use crate::status::TaskStatus;
use crate::supervisor::LineStream;

/// Short random id, stable across relaunches of the same task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(12);
        TaskId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a task is in its lifecycle, as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Claimed, waiting for its staggered spawn or for a relaunch backoff.
    Waiting,
    /// A downloader process is running for the current attempt.
    Running,
    /// Outcome handed to the recorder; leaves the set once recorded.
    Finishing,
}

#[derive(Debug)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub item_id: ItemId,
    pub video_code: String,
    /// Fetch mode that claimed the item (which lease flag is set).
    pub mode: FetchMode,
    pub retried_after_403: bool,
    pub retried_after_no_data_blocks: bool,
    /// Stdout lines, minus progress redraws.
    pub messages: Vec<String>,
    /// Every stderr line.
    pub error_messages: Vec<String>,
    pub most_recent_line: String,
    pub attempt: u32,
    /// Override flags of the current (or next) attempt.
    pub extra_args: Vec<String>,
    pub phase: Phase,
    /// First retryable decision of the current attempt.
    pub verdict: Option<RetryDecision>,
    pub cancel: CancellationToken,
    /// Child of `cancel` for the running attempt only. Firing it replaces or
    /// stops one process without cancelling the task.
    pub attempt_cancel: Option<CancellationToken>,
}

impl TaskRecord {
    pub fn new(item: &QueueItem, mode: FetchMode, cancel: CancellationToken) -> Self {
        Self {
            task_id: TaskId::generate(),
            item_id: item.id,
            video_code: item.code.clone(),
            mode,
            retried_after_403: false,
            retried_after_no_data_blocks: false,
            messages: Vec::new(),
            error_messages: Vec::new(),
            most_recent_line: "queued".to_string(),
            attempt: 0,
            extra_args: Vec::new(),
            phase: Phase::Waiting,
            verdict: None,
            cancel,
            attempt_cancel: None,
        }
    }

    pub fn has_retried(&self, reason: RetryReason) -> bool {
        match reason {
            RetryReason::Http403 => self.retried_after_403,
            RetryReason::NoDataBlocks => self.retried_after_no_data_blocks,
        }
    }

    /// Spend the retry for `reason`. Called when the relaunch is initiated.
    pub fn mark_retried(&mut self, reason: RetryReason) {
        match reason {
            RetryReason::Http403 => self.retried_after_403 = true,
            RetryReason::NoDataBlocks => self.retried_after_no_data_blocks = true,
        }
    }

    /// Append a line to the right transcript. Progress redraws only update the
    /// display line so long downloads don't grow the transcript unbounded.
    pub fn observe_line(&mut self, stream: LineStream, line: String, class: LineClass) {
        if class == LineClass::None {
            return;
        }
        self.most_recent_line.clone_from(&line);
        match stream {
            LineStream::Stdout if class == LineClass::Progress => {}
            LineStream::Stdout => self.messages.push(line),
            LineStream::Stderr => self.error_messages.push(line),
        }
    }

    /// Move the transcripts out for recording.
    pub fn take_finished(&mut self) -> FinishedTask {
        FinishedTask {
            task_id: self.task_id.clone(),
            item_id: self.item_id,
            video_code: self.video_code.clone(),
            messages: std::mem::take(&mut self.messages),
            error_messages: std::mem::take(&mut self.error_messages),
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.task_id.clone(),
            video_code: self.video_code.clone(),
            most_recent_line: self.most_recent_line.clone(),
            attempt: self.attempt,
            retried_after_403: self.retried_after_403,
            retried_after_no_data_blocks: self.retried_after_no_data_blocks,
        }
    }
}
