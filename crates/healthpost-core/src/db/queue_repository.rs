//! Pending operation queue

use crate::error::{Error, Result};
use crate::models::{NewOperationRecord, OperationRecord, Payload};
use libsql::{params, Connection, Row};

/// Trait for the durable queue of operations awaiting submission (async)
#[allow(async_fn_in_trait)]
pub trait OperationQueue {
    /// Append an operation; the queue assigns its local id
    async fn enqueue(&self, op: &NewOperationRecord) -> Result<OperationRecord>;

    /// All queued operations in insertion order
    async fn list_all(&self) -> Result<Vec<OperationRecord>>;

    /// Get one queued operation by local id
    async fn get(&self, local_id: i64) -> Result<Option<OperationRecord>>;

    /// Point an entry at a new local subject and pre-change snapshot
    async fn set_revert(
        &self,
        local_id: i64,
        subject_local_id: Option<i64>,
        snapshot: Option<&Payload>,
    ) -> Result<()>;

    /// Remove the given entries, returning how many were present
    async fn remove_batch(&self, local_ids: &[i64]) -> Result<usize>;

    /// Number of queued operations
    async fn count(&self) -> Result<usize>;
}

/// libSQL implementation of `OperationQueue`
pub struct LibSqlOperationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOperationQueue<'a> {
    /// Create a new queue over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &Row) -> Result<OperationRecord> {
        let kind: String = row.get(1)?;
        let entity: String = row.get(2)?;
        let idempotency_key: String = row.get(5)?;

        Ok(OperationRecord {
            local_id: row.get(0)?,
            kind: kind
                .parse()
                .map_err(|e| Error::Database(format!("corrupt queue operation: {e}")))?,
            entity: entity
                .parse()
                .map_err(|e| Error::Database(format!("corrupt queue entity: {e}")))?,
            target_id: row.get(3)?,
            payload: decode_payload(row.get(4)?)?,
            idempotency_key: idempotency_key
                .parse()
                .map_err(|e| Error::Database(format!("corrupt idempotency key: {e}")))?,
            subject_local_id: row.get(6)?,
            revert_snapshot: decode_payload(row.get(7)?)?,
            created_at: row.get(8)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT local_id, operation, entity, target_id, payload, idempotency_key,
        subject_local_id, revert_snapshot, created_at
 FROM sync_queue";

impl OperationQueue for LibSqlOperationQueue<'_> {
    async fn enqueue(&self, op: &NewOperationRecord) -> Result<OperationRecord> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let idempotency_key = crate::models::IdempotencyKey::new();

        self.conn
            .execute(
                "INSERT INTO sync_queue (operation, entity, target_id, payload, idempotency_key,
                    subject_local_id, revert_snapshot, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    op.kind.as_str(),
                    op.entity.as_str(),
                    op.target_id,
                    encode_payload(op.payload.as_ref())?,
                    idempotency_key.as_str(),
                    op.subject_local_id,
                    encode_payload(op.revert_snapshot.as_ref())?,
                    created_at
                ],
            )
            .await?;

        let record = OperationRecord {
            local_id: self.conn.last_insert_rowid(),
            kind: op.kind,
            entity: op.entity,
            target_id: op.target_id,
            payload: op.payload.clone(),
            idempotency_key,
            subject_local_id: op.subject_local_id,
            revert_snapshot: op.revert_snapshot.clone(),
            created_at,
        };
        tracing::debug!(
            local_id = record.local_id,
            action = %record.to_operation().action(),
            "Queued operation"
        );
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<OperationRecord>> {
        let mut rows = self
            .conn
            .query(&format!("{SELECT_COLUMNS} ORDER BY local_id ASC"), ())
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    async fn get(&self, local_id: i64) -> Result<Option<OperationRecord>> {
        let mut rows = self
            .conn
            .query(&format!("{SELECT_COLUMNS} WHERE local_id = ?"), [local_id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_revert(
        &self,
        local_id: i64,
        subject_local_id: Option<i64>,
        snapshot: Option<&Payload>,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue SET subject_local_id = ?, revert_snapshot = ? WHERE local_id = ?",
                params![subject_local_id, encode_payload(snapshot)?, local_id],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queued operation {local_id}")));
        }
        Ok(())
    }

    async fn remove_batch(&self, local_ids: &[i64]) -> Result<usize> {
        let mut removed = 0;
        for local_id in local_ids {
            let rows = self
                .conn
                .execute("DELETE FROM sync_queue WHERE local_id = ?", [*local_id])
                .await?;
            removed += usize::try_from(rows).unwrap_or(0);
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_queue", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

pub(crate) fn encode_payload(payload: Option<&Payload>) -> Result<Option<String>> {
    payload
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

pub(crate) fn decode_payload(raw: Option<String>) -> Result<Option<Payload>> {
    raw.map(|text| serde_json::from_str::<Payload>(&text))
        .transpose()
        .map_err(Into::into)
}
