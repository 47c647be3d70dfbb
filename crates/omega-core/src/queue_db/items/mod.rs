//! Queue item CRUD on `QueueDb`.

mod read;
mod write;
