use std::path::Path;

use healthpost_core::models::Payload;
use healthpost_core::util::unix_millis_now;
use serde_json::Value;

use crate::cli::InventoryCommands;
use crate::commands::common::{
    format_inventory_lines, normalize_name, open_store, record_to_list_item, RecordListItem,
};
use crate::error::CliError;

pub async fn run_inventory(command: InventoryCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        InventoryCommands::Add {
            name,
            stock,
            threshold,
            expiry,
        } => {
            let mut payload = Payload::new();
            payload.insert("name".to_string(), Value::String(normalize_name(&name)?));
            payload.insert("stock".to_string(), Value::from(stock));
            payload.insert("threshold".to_string(), Value::from(threshold));
            payload.insert("expiryDate".to_string(), Value::String(expiry.trim().to_string()));

            let entry = open_store(db_path)
                .await?
                .record_inventory_create(payload)
                .await?;
            println!("Queued {} as operation {}", entry.entity, entry.local_id);
        }
        InventoryCommands::Update {
            id,
            name,
            stock,
            threshold,
            expiry,
        } => {
            let payload = inventory_patch(name, stock, threshold, expiry)?;
            let entry = open_store(db_path)
                .await?
                .record_inventory_update(id, payload)
                .await?;
            println!("Queued update of inventory #{id} as operation {}", entry.local_id);
        }
        InventoryCommands::Delete { id } => {
            let entry = open_store(db_path).await?.record_inventory_delete(id).await?;
            println!("Queued delete of inventory #{id} as operation {}", entry.local_id);
        }
        InventoryCommands::List { json } => {
            let items = open_store(db_path).await?.list_inventory().await?;
            if json {
                let json_items = items
                    .iter()
                    .map(record_to_list_item)
                    .collect::<Vec<RecordListItem>>();
                println!("{}", serde_json::to_string_pretty(&json_items)?);
            } else if items.is_empty() {
                println!("No inventory on this device.");
            } else {
                for line in format_inventory_lines(&items, unix_millis_now()) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

pub fn inventory_patch(
    name: Option<String>,
    stock: Option<i64>,
    threshold: Option<i64>,
    expiry: Option<String>,
) -> Result<Payload, CliError> {
    let mut payload = Payload::new();
    if let Some(name) = name {
        payload.insert("name".to_string(), Value::String(normalize_name(&name)?));
    }
    if let Some(stock) = stock {
        payload.insert("stock".to_string(), Value::from(stock));
    }
    if let Some(threshold) = threshold {
        payload.insert("threshold".to_string(), Value::from(threshold));
    }
    if let Some(expiry) = expiry {
        payload.insert("expiryDate".to_string(), Value::String(expiry.trim().to_string()));
    }

    if payload.is_empty() {
        return Err(CliError::NothingToUpdate);
    }
    Ok(payload)
}
