pub mod config;
pub mod control;
pub mod logging;
pub mod queue_db;
pub mod recorder;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod supervisor;
pub mod task;
