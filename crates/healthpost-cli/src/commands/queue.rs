use std::path::Path;

use healthpost_core::util::unix_millis_now;

use crate::cli::QueueCommands;
use crate::commands::common::{format_queue_lines, open_store, queue_to_list_item, QueueListItem};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    match command {
        QueueCommands::List { json } => {
            let entries = store.pending().await?;
            if json {
                let json_items = entries
                    .iter()
                    .map(queue_to_list_item)
                    .collect::<Vec<QueueListItem>>();
                println!("{}", serde_json::to_string_pretty(&json_items)?);
            } else if entries.is_empty() {
                println!("Queue is empty.");
            } else {
                for line in format_queue_lines(&entries, unix_millis_now()) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Discard { local_id } => {
            let entry = store.discard(local_id).await?;
            println!(
                "Discarded operation {} ({}); local changes reverted",
                entry.local_id,
                entry.to_operation().action()
            );
        }
    }
    Ok(())
}
