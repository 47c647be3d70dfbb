//! CLI command handlers, one per file.

mod add;
mod cancel;
mod run;
mod status;

pub use add::run_add;
pub use cancel::{run_cancel, run_shutdown};
pub use run::{run_orchestrator, RunOptions};
pub use status::run_status;
