//! Inventory item model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A stocked medicine or supply, shared by all users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    /// Server-assigned id
    pub id: i64,
    pub name: String,
    /// Units on hand, never negative
    pub stock: i64,
    /// Reorder level
    pub threshold: i64,
    pub expiry_date: NaiveDate,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl InventoryItem {
    /// Stock has fallen to or below the reorder threshold
    pub const fn is_low_stock(&self) -> bool {
        self.stock <= self.threshold
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }
}

/// Validated fields for an inventory row that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInventoryItem {
    pub name: String,
    pub stock: i64,
    pub threshold: i64,
    pub expiry_date: NaiveDate,
    pub created_at: i64,
}
