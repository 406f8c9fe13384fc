//! Device-side record copies

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::inventory::InventoryItem;
use super::operation::{EntityKind, Payload};

/// Optimistic local copy of an inventory item or patient.
///
/// `data` holds the fields as they were entered on the device; `server_id`
/// is filled in once the create has been confirmed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub local_id: i64,
    pub entity: EntityKind,
    pub server_id: Option<i64>,
    pub data: Payload,
    /// Last local change (Unix ms)
    pub updated_at: i64,
}

impl LocalRecord {
    pub fn is_synced(&self) -> bool {
        self.server_id.is_some()
    }

    /// Display name, when the record has one
    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(Value::as_str)
    }

    /// Integer field, accepting numeric strings the way forms often submit them
    pub fn integer(&self, field: &str) -> Option<i64> {
        match self.data.get(field)? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Typed view of a local inventory row, if it holds a complete item.
    ///
    /// `id` is 0 until the create has been confirmed.
    pub fn inventory_view(&self) -> Option<InventoryItem> {
        if self.entity != EntityKind::InventoryItem {
            return None;
        }
        let expiry = self.data.get("expiryDate").and_then(Value::as_str)?;
        Some(InventoryItem {
            id: self.server_id.unwrap_or_default(),
            name: self.name()?.to_string(),
            stock: self.integer("stock")?,
            threshold: self.integer("threshold").unwrap_or(0),
            expiry_date: NaiveDate::parse_from_str(expiry.get(..10)?, "%Y-%m-%d").ok()?,
            created_at: self.integer("createdAt").unwrap_or(self.updated_at),
            updated_at: self.updated_at,
        })
    }
}
