use std::fmt;
use std::time::Duration;

use super::classify::LineClass;
use crate::task::TaskRecord;

/// Why a task was relaunched (or gave up). Each reason allows one retry per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryReason {
    Http403,
    NoDataBlocks,
}

impl RetryReason {
    pub fn from_class(class: LineClass) -> Option<Self> {
        match class {
            LineClass::Retryable403 => Some(RetryReason::Http403),
            LineClass::RetryableNoDataBlocks => Some(RetryReason::NoDataBlocks),
            _ => None,
        }
    }

    /// Console annotation shown once the retry for this reason has been used.
    pub fn annotation(self) -> &'static str {
        match self {
            RetryReason::Http403 => "(second attempt after 403)",
            RetryReason::NoDataBlocks => "(second attempt after data blocks error)",
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::Http403 => f.write_str("HTTP 403"),
            RetryReason::NoDataBlocks => f.write_str("no data blocks"),
        }
    }
}

/// Decision returned by the retry policy for one classified line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Not actionable; the process exit decides the outcome.
    Continue,
    /// Relaunch the same task once the current process is gone.
    Relaunch {
        reason: RetryReason,
        delay: Duration,
        extra_args: Vec<String>,
    },
    /// The retry for this reason was already spent; the task fails.
    GiveUp(RetryReason),
}

/// One-retry-per-reason policy.
///
/// 403s are retried with the same arguments after `backoff`; missing data
/// blocks are retried with `format_override_args` after `backoff`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub format_override_args: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            format_override_args: vec!["-f".to_string(), "bestvideo[ext=mp4]".to_string()],
        }
    }
}

impl RetryPolicy {
    /// Decide what a classified line means for `task`. Pure: the caller marks
    /// the retry on the task when it initiates it.
    pub fn decide(&self, task: &TaskRecord, class: LineClass) -> RetryDecision {
        let Some(reason) = RetryReason::from_class(class) else {
            return RetryDecision::Continue;
        };
        if task.has_retried(reason) {
            return RetryDecision::GiveUp(reason);
        }
        let extra_args = match reason {
            RetryReason::Http403 => Vec::new(),
            RetryReason::NoDataBlocks => self.format_override_args.clone(),
        };
        RetryDecision::Relaunch {
            reason,
            delay: self.backoff,
            extra_args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::tests::sample_task;

    #[test]
    fn continue_for_non_retryable_lines() {
        let p = RetryPolicy::default();
        let task = sample_task("abc123");
        for class in [LineClass::Other, LineClass::Progress, LineClass::None] {
            assert_eq!(p.decide(&task, class), RetryDecision::Continue);
        }
    }

    #[test]
    fn first_403_relaunches_without_extra_args() {
        let p = RetryPolicy::default();
        let task = sample_task("abc123");
        assert_eq!(
            p.decide(&task, LineClass::Retryable403),
            RetryDecision::Relaunch {
                reason: RetryReason::Http403,
                delay: Duration::from_secs(5),
                extra_args: Vec::new(),
            }
        );
    }

    #[test]
    fn second_403_gives_up() {
        let p = RetryPolicy::default();
        let mut task = sample_task("abc123");
        task.mark_retried(RetryReason::Http403);
        assert_eq!(
            p.decide(&task, LineClass::Retryable403),
            RetryDecision::GiveUp(RetryReason::Http403)
        );
    }

    #[test]
    fn no_data_blocks_relaunches_with_format_override() {
        let p = RetryPolicy {
            backoff: Duration::from_millis(10),
            format_override_args: vec!["-f".into(), "best".into()],
        };
        let task = sample_task("abc123");
        match p.decide(&task, LineClass::RetryableNoDataBlocks) {
            RetryDecision::Relaunch {
                reason,
                delay,
                extra_args,
            } => {
                assert_eq!(reason, RetryReason::NoDataBlocks);
                assert_eq!(delay, Duration::from_millis(10));
                assert_eq!(extra_args, vec!["-f", "best"]);
            }
            other => panic!("expected relaunch, got {:?}", other),
        }
    }

    #[test]
    fn retry_dimensions_are_independent() {
        let p = RetryPolicy::default();
        let mut task = sample_task("abc123");
        task.mark_retried(RetryReason::Http403);
        assert!(matches!(
            p.decide(&task, LineClass::RetryableNoDataBlocks),
            RetryDecision::Relaunch {
                reason: RetryReason::NoDataBlocks,
                ..
            }
        ));
        task.mark_retried(RetryReason::NoDataBlocks);
        assert_eq!(
            p.decide(&task, LineClass::RetryableNoDataBlocks),
            RetryDecision::GiveUp(RetryReason::NoDataBlocks)
        );
    }
}
