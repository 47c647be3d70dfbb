//! Types used by the download queue database.

use std::fmt;

/// Queue item identifier (SQLite row id).
pub type ItemId = i64;

/// Which pool of items a refill draws from, and which in-progress flag it sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Never-started items; claimed with `downloading = 1`.
    #[default]
    New,
    /// Items left `downloading` without an outcome (e.g. after a crash);
    /// claimed with `retrying = 1`.
    Stalled,
}

impl FetchMode {
    /// The other mode; refills switch whenever the current one comes back empty.
    pub fn flipped(self) -> Self {
        match self {
            FetchMode::New => FetchMode::Stalled,
            FetchMode::Stalled => FetchMode::New,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchMode::New => "new",
            FetchMode::Stalled => "stalled",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full queue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: ItemId,
    pub code: String,
    pub priority: i64,
    pub queued_at: i64,
    pub downloading: bool,
    pub retrying: bool,
    pub completed: bool,
    pub failed: bool,
    pub completed_at: Option<i64>,
    pub message_log: Option<String>,
    pub error_log: Option<String>,
}

impl QueueItem {
    /// Completed or failed items are never selected again.
    pub fn is_terminal(&self) -> bool {
        self.completed || self.failed
    }

    /// Human-readable state for `omega status`.
    pub fn state_label(&self) -> &'static str {
        if self.completed {
            "completed"
        } else if self.failed {
            "failed"
        } else if self.retrying {
            "retrying"
        } else if self.downloading {
            "downloading"
        } else {
            "queued"
        }
    }
}

/// Item to insert through the ingestion path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueItem {
    pub code: String,
    pub priority: i64,
    /// Unix seconds; `None` means "now".
    pub queued_at: Option<i64>,
}

impl NewQueueItem {
    pub fn new(code: impl Into<String>, priority: i64) -> Self {
        Self {
            code: code.into(),
            priority,
            queued_at: None,
        }
    }
}

/// Terminal status written by the outcome recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed,
    Failed,
}

/// Fields written once per task when it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeUpdate {
    pub completed_at: i64,
    pub message_log: String,
    pub error_log: String,
    pub status: TerminalStatus,
}

/// Typed validation errors surfaced by the queue database.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue item code must not be empty")]
    EmptyCode,
}
