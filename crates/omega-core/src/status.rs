//! Operator console: periodic full-screen readout of the active tasks.
//!
//! The dispatcher publishes a `StatusSnapshot` on a watch channel after every
//! event; the reporter only reads it.

use std::io::Write;
use std::time::Duration;

use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::queue_db::FetchMode;
use crate::retry::RetryReason;
use crate::task::TaskId;

/// Display view of one active task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub video_code: String,
    pub most_recent_line: String,
    pub attempt: u32,
    pub retried_after_403: bool,
    pub retried_after_no_data_blocks: bool,
}

/// Everything the console shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub mode: FetchMode,
    pub fetch_in_flight: bool,
    pub shutting_down: bool,
    pub tasks: Vec<TaskStatus>,
}

fn mode_label(mode: FetchMode) -> &'static str {
    match mode {
        FetchMode::New => "draining new items",
        FetchMode::Stalled => "retrying stalled items",
    }
}

/// Render the snapshot as console text (no terminal control codes).
pub fn render(snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();
    out.push_str("---- omega ----\n");
    out.push_str("mode: ");
    out.push_str(mode_label(snapshot.mode));
    if snapshot.fetch_in_flight {
        out.push_str(" (fetching)");
    }
    if snapshot.shutting_down {
        out.push_str(" (shutting down)");
    }
    out.push('\n');

    if snapshot.tasks.is_empty() {
        out.push_str("No downloads -- currently idle\n");
        return out;
    }
    out.push_str(&format!("{} current downloads\n", snapshot.tasks.len()));

    for task in &snapshot.tasks {
        out.push_str(&format!("({}) - {}", task.video_code, task.most_recent_line));
        if task.retried_after_403 {
            out.push(' ');
            out.push_str(RetryReason::Http403.annotation());
        }
        if task.retried_after_no_data_blocks {
            out.push(' ');
            out.push_str(RetryReason::NoDataBlocks.annotation());
        }
        out.push('\n');
    }
    out
}

/// Redraw the console every `interval` until `cancel` fires.
pub async fn run_status_reporter(
    mut rx: watch::Receiver<StatusSnapshot>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let text = render(&rx.borrow_and_update());
        let mut stdout = std::io::stdout();
        if let Err(e) = execute!(stdout, Clear(ClearType::All), MoveTo(0, 0)) {
            tracing::debug!("console clear failed: {}", e);
        }
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(code: &str, line: &str) -> TaskStatus {
        TaskStatus {
            task_id: TaskId::from("t"),
            video_code: code.to_string(),
            most_recent_line: line.to_string(),
            attempt: 1,
            retried_after_403: false,
            retried_after_no_data_blocks: false,
        }
    }

    #[test]
    fn idle_readout() {
        let text = render(&StatusSnapshot::default());
        assert_eq!(
            text,
            "---- omega ----\nmode: draining new items\nNo downloads -- currently idle\n"
        );
    }

    #[test]
    fn one_line_per_task_with_annotations() {
        let mut retried = task("O-MViv-D0ow", "[download]  12.0% of 10.00MiB");
        retried.retried_after_403 = true;
        retried.retried_after_no_data_blocks = true;
        let snapshot = StatusSnapshot {
            mode: FetchMode::Stalled,
            fetch_in_flight: true,
            shutting_down: false,
            tasks: vec![task("abc123", "spawned"), retried],
        };
        let text = render(&snapshot);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "mode: retrying stalled items (fetching)");
        assert_eq!(lines[2], "2 current downloads");
        assert_eq!(lines[3], "(abc123) - spawned");
        assert_eq!(
            lines[4],
            "(O-MViv-D0ow) - [download]  12.0% of 10.00MiB (second attempt after 403) \
             (second attempt after data blocks error)"
        );
    }
}
