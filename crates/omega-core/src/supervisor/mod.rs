//! Process supervision: one external downloader process per attempt.
//!
//! A `Launcher` starts the process for a `LaunchRequest` and reports back on
//! an `AttemptEvent` channel: every output line in arrival order, then exactly
//! one `Exited`. It never decides retries or outcomes; that is the
//! dispatcher's job.

mod lines;
mod process;

use tokio_util::sync::CancellationToken;

use crate::task::TaskId;

pub use lines::pump_lines;
pub use process::{build_video_url, ProcessLauncher};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStream {
    Stdout,
    Stderr,
}

/// Everything needed to start one attempt of a task.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub task_id: TaskId,
    /// 1-based; bumped on every relaunch of the same task.
    pub attempt: u32,
    pub video_code: String,
    pub extra_args: Vec<String>,
    /// Fires when the attempt must be killed (task cancel or shutdown).
    pub cancel: CancellationToken,
}

/// Report from a running attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptEvent {
    pub task_id: TaskId,
    pub attempt: u32,
    pub kind: AttemptEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEventKind {
    Line { stream: LineStream, line: String },
    /// Process is gone and both pipes are drained. `code` is `None` when the
    /// process died from a signal (including our own kill on cancel).
    Exited { code: Option<i32> },
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid video url for code `{code}`: {reason}")]
    InvalidUrl { code: String, reason: String },
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),
}

/// Starts downloader attempts. The production implementation is
/// `ProcessLauncher`; tests substitute scripted launchers.
pub trait Launcher: Send + Sync + 'static {
    /// Start the attempt and return immediately. On `Ok`, the launcher must
    /// eventually send exactly one `Exited` event for this attempt on `events`.
    fn launch(
        &self,
        request: LaunchRequest,
        events: tokio::sync::mpsc::Sender<AttemptEvent>,
    ) -> Result<(), LaunchError>;
}
