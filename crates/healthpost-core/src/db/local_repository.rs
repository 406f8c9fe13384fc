//! Device-side record copies

use crate::error::{Error, Result};
use crate::models::{EntityKind, LocalRecord, Payload};
use libsql::{params, Connection, Row};

use super::queue_repository::encode_payload;

/// libSQL repository for the optimistic local copies of inventory and patients
pub struct LibSqlLocalRecords<'a> {
    conn: &'a Connection,
}

const fn table(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::InventoryItem => "local_inventory",
        EntityKind::PatientRecord => "local_patients",
    }
}

impl<'a> LibSqlLocalRecords<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(entity: EntityKind, row: &Row) -> Result<LocalRecord> {
        let data: String = row.get(2)?;
        Ok(LocalRecord {
            local_id: row.get(0)?,
            entity,
            server_id: row.get(1)?,
            data: serde_json::from_str(&data)?,
            updated_at: row.get(3)?,
        })
    }

    /// Insert a new local-only record
    pub async fn insert(&self, entity: EntityKind, data: &Payload) -> Result<LocalRecord> {
        let now = chrono::Utc::now().timestamp_millis();
        let encoded = serde_json::to_string(data)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (server_id, data, updated_at) VALUES (NULL, ?, ?)",
                    table(entity)
                ),
                params![encoded, now],
            )
            .await?;

        Ok(LocalRecord {
            local_id: self.conn.last_insert_rowid(),
            entity,
            server_id: None,
            data: data.clone(),
            updated_at: now,
        })
    }

    pub async fn get(&self, entity: EntityKind, local_id: i64) -> Result<Option<LocalRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT local_id, server_id, data, updated_at FROM {} WHERE local_id = ?",
                    table(entity)
                ),
                [local_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(entity, &row)?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_server_id(
        &self,
        entity: EntityKind,
        server_id: i64,
    ) -> Result<Option<LocalRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT local_id, server_id, data, updated_at FROM {} WHERE server_id = ?",
                    table(entity)
                ),
                [server_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(entity, &row)?)),
            None => Ok(None),
        }
    }

    /// All local records of one kind, oldest first
    pub async fn list(&self, entity: EntityKind) -> Result<Vec<LocalRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT local_id, server_id, data, updated_at FROM {} ORDER BY local_id ASC",
                    table(entity)
                ),
                (),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(entity, &row)?);
        }
        Ok(records)
    }

    /// Overwrite a record's data
    pub async fn replace_data(
        &self,
        entity: EntityKind,
        local_id: i64,
        data: &Payload,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE {} SET data = ?, updated_at = ? WHERE local_id = ?",
                    table(entity)
                ),
                params![serde_json::to_string(data)?, now, local_id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{entity} local record {local_id}")));
        }
        Ok(())
    }

    /// Put a previously captured record back exactly as it was
    pub async fn restore(
        &self,
        entity: EntityKind,
        local_id: i64,
        server_id: Option<i64>,
        data: &Payload,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (local_id, server_id, data, updated_at) VALUES (?, ?, ?, ?)",
                    table(entity)
                ),
                params![local_id, server_id, encode_payload(Some(data))?, now],
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, entity: EntityKind, local_id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                &format!("DELETE FROM {} WHERE local_id = ?", table(entity)),
                [local_id],
            )
            .await?;
        Ok(rows > 0)
    }

    /// Link a local record to the id the server assigned it
    pub async fn set_server_id(
        &self,
        entity: EntityKind,
        local_id: i64,
        server_id: i64,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE {} SET server_id = ? WHERE local_id = ?",
                    table(entity)
                ),
                [server_id, local_id],
            )
            .await?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Schema};
    use serde_json::{json, Value};

    fn payload(value: Value) -> Payload {
        let Value::Object(map) = value else {
            panic!("payload must be an object");
        };
        map
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_link_and_find() {
        let db = Database::open_in_memory(Schema::Device).await.unwrap();
        let repo = LibSqlLocalRecords::new(db.connection());

        let record = repo
            .insert(EntityKind::InventoryItem, &payload(json!({"name": "ORS"})))
            .await
            .unwrap();
        assert!(!record.is_synced());

        assert!(repo
            .set_server_id(EntityKind::InventoryItem, record.local_id, 42)
            .await
            .unwrap());

        let found = repo
            .find_by_server_id(EntityKind::InventoryItem, 42)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.local_id, record.local_id);
        assert_eq!(found.name(), Some("ORS"));

        // Tables are separate per entity
        assert!(repo
            .find_by_server_id(EntityKind::PatientRecord, 42)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_recreates_deleted_row() {
        let db = Database::open_in_memory(Schema::Device).await.unwrap();
        let repo = LibSqlLocalRecords::new(db.connection());

        let data = payload(json!({"name": "Sita", "type": "maternal"}));
        let record = repo.insert(EntityKind::PatientRecord, &data).await.unwrap();
        assert!(repo
            .delete(EntityKind::PatientRecord, record.local_id)
            .await
            .unwrap());

        repo.restore(EntityKind::PatientRecord, record.local_id, Some(3), &data)
            .await
            .unwrap();

        let restored = repo
            .get(EntityKind::PatientRecord, record.local_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.server_id, Some(3));
        assert_eq!(restored.data, data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_missing_row_is_not_found() {
        let db = Database::open_in_memory(Schema::Device).await.unwrap();
        let repo = LibSqlLocalRecords::new(db.connection());

        let err = repo
            .replace_data(EntityKind::InventoryItem, 77, &Payload::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
