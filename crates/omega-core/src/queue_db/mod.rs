//! Persistent download queue (SQLite via sqlx).
//!
//! Stores one row per video code with its priority, lease flags
//! (`downloading` / `retrying`), terminal flags and the transcripts of the
//! task that finished it.

mod db;
mod items;
mod store;
mod types;

pub use db::{default_db_path, unix_timestamp, QueueDb};
pub use store::QueueStore;
pub use types::*;

#[cfg(test)]
pub(crate) use db::open_memory;
