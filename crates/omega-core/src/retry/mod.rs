//! Output classification and retry policy.
//!
//! `classify` turns downloader output into `LineClass`es; `RetryPolicy`
//! decides, per task, whether a retryable class earns a relaunch or ends the
//! task as failed.

mod classify;
mod policy;

pub use classify::{classify, LineClass, HTTP_403_MARKER, NO_DATA_BLOCKS_MARKER};
pub use policy::{RetryDecision, RetryPolicy, RetryReason};
