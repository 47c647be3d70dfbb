//! Download orchestration.
//!
//! A single dispatcher owns the active task set. Refills claim queue items
//! (alternating between new and stalled items), launchers run one downloader
//! per attempt, retryable output relaunches the same task, and every finished
//! task goes through the outcome recorder before it leaves the set.

mod attempt;
mod orchestrator;
mod refill;

pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorHandle, RunSummary};
