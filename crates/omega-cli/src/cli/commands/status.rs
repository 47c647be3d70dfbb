//! `omega status` – list queue items.

use anyhow::Result;
use omega_core::queue_db::QueueDb;

pub async fn run_status(db: &QueueDb, all: bool) -> Result<()> {
    let items = db.list_items(all).await?;
    if items.is_empty() {
        println!("No items in queue.");
        return Ok(());
    }
    println!("{:<6} {:<12} {:<8} {}", "ID", "STATE", "PRIO", "CODE");
    for item in items {
        println!(
            "{:<6} {:<12} {:<8} {}",
            item.id,
            item.state_label(),
            item.priority,
            item.code
        );
    }
    Ok(())
}
