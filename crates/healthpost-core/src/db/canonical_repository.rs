//! Server-side canonical tables

use crate::error::{Error, Result};
use crate::models::{
    EntityKind, IdempotencyKey, InventoryItem, NewInventoryItem, NewPatientRecord,
    OperationKind, PatientDetails, PatientRecord,
};
use chrono::NaiveDate;
use libsql::{params, Connection, Row};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// An operation already applied for a client-supplied idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedOperation {
    pub entity: EntityKind,
    pub kind: OperationKind,
    pub record_id: i64,
}

/// libSQL repository for canonical inventory and patient rows.
///
/// Works on a plain connection or inside a transaction.
pub struct CanonicalRepository<'a> {
    conn: &'a Connection,
}

impl<'a> CanonicalRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_inventory(row: &Row) -> Result<InventoryItem> {
        let expiry: String = row.get(4)?;
        Ok(InventoryItem {
            id: row.get(0)?,
            name: row.get(1)?,
            stock: row.get(2)?,
            threshold: row.get(3)?,
            expiry_date: NaiveDate::parse_from_str(&expiry, DATE_FORMAT)
                .map_err(|e| Error::Database(format!("corrupt expiry_date `{expiry}`: {e}")))?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn parse_patient(row: &Row) -> Result<PatientRecord> {
        let details: String = row.get(3)?;
        Ok(PatientRecord {
            id: row.get(0)?,
            owner_user_id: row.get(1)?,
            name: row.get(2)?,
            details: serde_json::from_str::<PatientDetails>(&details)?,
            consumed_inventory_id: row.get(4)?,
            consumed_quantity: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    // ---------------------------------------------------------------------
    // Inventory
    // ---------------------------------------------------------------------

    pub async fn insert_inventory(&self, item: &NewInventoryItem) -> Result<InventoryItem> {
        self.conn
            .execute(
                "INSERT INTO inventory (name, stock, threshold, expiry_date, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    item.name.as_str(),
                    item.stock,
                    item.threshold,
                    item.expiry_date.format(DATE_FORMAT).to_string(),
                    item.created_at,
                    item.created_at
                ],
            )
            .await?;

        Ok(InventoryItem {
            id: self.conn.last_insert_rowid(),
            name: item.name.clone(),
            stock: item.stock,
            threshold: item.threshold,
            expiry_date: item.expiry_date,
            created_at: item.created_at,
            updated_at: item.created_at,
        })
    }

    pub async fn get_inventory(&self, id: i64) -> Result<Option<InventoryItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, stock, threshold, expiry_date, created_at, updated_at
                 FROM inventory WHERE id = ?",
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_inventory(&row)?)),
            None => Ok(None),
        }
    }

    /// All inventory, newest first
    pub async fn list_inventory(&self) -> Result<Vec<InventoryItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, stock, threshold, expiry_date, created_at, updated_at
                 FROM inventory ORDER BY created_at DESC, id DESC",
                (),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_inventory(&row)?);
        }
        Ok(items)
    }

    /// Write every column of an existing row
    pub async fn update_inventory(&self, item: &InventoryItem) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE inventory
                 SET name = ?, stock = ?, threshold = ?, expiry_date = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    item.name.as_str(),
                    item.stock,
                    item.threshold,
                    item.expiry_date.format(DATE_FORMAT).to_string(),
                    item.updated_at,
                    item.id
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    pub async fn delete_inventory(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM inventory WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    /// Take `quantity` units only if at least that many are in stock.
    ///
    /// Returns `false` when the guard fails and nothing was written.
    pub async fn try_decrement_stock(&self, id: i64, quantity: i64, now: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE inventory SET stock = stock - ?, updated_at = ?
                 WHERE id = ? AND stock >= ?",
                [quantity, now, id, quantity],
            )
            .await?;
        Ok(rows == 1)
    }

    // ---------------------------------------------------------------------
    // Patients
    // ---------------------------------------------------------------------

    pub async fn insert_patient(
        &self,
        patient: &NewPatientRecord,
        owner_user_id: &str,
    ) -> Result<PatientRecord> {
        let details = serde_json::to_string(&patient.details)?;
        let medicine_id = patient.consumption.map(|c| c.inventory_id);

        self.conn
            .execute(
                "INSERT INTO patients (owner_user_id, name, kind, details, medicine_id, quantity,
                    created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    owner_user_id,
                    patient.name.as_str(),
                    patient.details.patient_type().as_str(),
                    details,
                    medicine_id,
                    patient.quantity,
                    patient.created_at,
                    patient.created_at
                ],
            )
            .await?;

        Ok(PatientRecord {
            id: self.conn.last_insert_rowid(),
            owner_user_id: owner_user_id.to_string(),
            name: patient.name.clone(),
            details: patient.details.clone(),
            consumed_inventory_id: medicine_id,
            consumed_quantity: patient.quantity,
            created_at: patient.created_at,
            updated_at: patient.created_at,
        })
    }

    pub async fn get_patient(&self, id: i64) -> Result<Option<PatientRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_user_id, name, details, medicine_id, quantity, created_at, updated_at
                 FROM patients WHERE id = ?",
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_patient(&row)?)),
            None => Ok(None),
        }
    }

    /// Patients owned by one user, newest first
    pub async fn list_patients(&self, owner_user_id: &str) -> Result<Vec<PatientRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_user_id, name, details, medicine_id, quantity, created_at, updated_at
                 FROM patients WHERE owner_user_id = ?
                 ORDER BY created_at DESC, id DESC",
                [owner_user_id],
            )
            .await?;

        let mut patients = Vec::new();
        while let Some(row) = rows.next().await? {
            patients.push(Self::parse_patient(&row)?);
        }
        Ok(patients)
    }

    /// Write name and details of an existing row; ownership and consumption never change
    pub async fn update_patient(&self, patient: &PatientRecord) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE patients SET name = ?, details = ?, updated_at = ? WHERE id = ?",
                params![
                    patient.name.as_str(),
                    serde_json::to_string(&patient.details)?,
                    patient.updated_at,
                    patient.id
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    pub async fn delete_patient(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM patients WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    // ---------------------------------------------------------------------
    // Idempotency ledger
    // ---------------------------------------------------------------------

    pub async fn find_applied(
        &self,
        owner_user_id: &str,
        key: &IdempotencyKey,
    ) -> Result<Option<AppliedOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity, operation, record_id FROM applied_operations
                 WHERE owner_user_id = ? AND client_op_id = ?",
                params![owner_user_id, key.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let entity: String = row.get(0)?;
        let kind: String = row.get(1)?;
        Ok(Some(AppliedOperation {
            entity: entity
                .parse()
                .map_err(|e| Error::Database(format!("corrupt applied entity: {e}")))?,
            kind: kind
                .parse()
                .map_err(|e| Error::Database(format!("corrupt applied operation: {e}")))?,
            record_id: row.get(2)?,
        }))
    }

    pub async fn record_applied(
        &self,
        owner_user_id: &str,
        key: &IdempotencyKey,
        applied: AppliedOperation,
        now: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO applied_operations
                    (owner_user_id, client_op_id, entity, operation, record_id, applied_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    owner_user_id,
                    key.as_str(),
                    applied.entity.as_str(),
                    applied.kind.as_str(),
                    applied.record_id,
                    now
                ],
            )
            .await?;
        Ok(())
    }
}
