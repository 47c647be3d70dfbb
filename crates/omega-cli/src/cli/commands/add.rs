//! `omega add <code>...` – queue video codes.

use anyhow::Result;
use omega_core::queue_db::{NewQueueItem, QueueDb};

pub async fn run_add(db: &QueueDb, codes: &[String], priority: i64) -> Result<()> {
    let items: Vec<NewQueueItem> = codes
        .iter()
        .map(|code| NewQueueItem::new(code.as_str(), priority))
        .collect();
    let ids = db.insert_items(&items).await?;
    for (id, code) in ids.iter().zip(codes) {
        println!("Queued {} as item {id} (priority {priority})", code.trim());
    }
    Ok(())
}
