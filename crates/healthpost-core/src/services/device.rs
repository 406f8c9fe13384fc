//! Device-side store: optimistic local writes plus the pending queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::{Database, LibSqlLocalRecords, LibSqlOperationQueue, OperationQueue, Schema};
use crate::models::{
    EntityKind, LocalRecord, NewOperationRecord, OperationKind, OperationRecord, Payload,
};
use crate::sync::Confirmation;
use crate::{Error, Result};

/// Thread-safe handle on the device database.
///
/// Every `record_*` call changes the local copy and queues the matching
/// operation in one local transaction, so the two never disagree.
#[derive(Clone)]
pub struct DeviceStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DeviceStore {
    /// Open a device store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path, Schema::Device).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory device store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory(Schema::Device).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // ---------------------------------------------------------------------
    // Phase 1: record mutations locally
    // ---------------------------------------------------------------------

    pub async fn record_inventory_create(&self, payload: Payload) -> Result<OperationRecord> {
        self.record_create(EntityKind::InventoryItem, payload).await
    }

    pub async fn record_inventory_update(
        &self,
        server_id: i64,
        payload: Payload,
    ) -> Result<OperationRecord> {
        self.record_update(EntityKind::InventoryItem, server_id, payload)
            .await
    }

    pub async fn record_inventory_delete(&self, server_id: i64) -> Result<OperationRecord> {
        self.record_delete(EntityKind::InventoryItem, server_id).await
    }

    /// Register a patient; a locally known `medicineId` also takes stock from the local copy
    pub async fn record_patient_create(&self, payload: Payload) -> Result<OperationRecord> {
        self.record_create(EntityKind::PatientRecord, payload).await
    }

    pub async fn record_patient_update(
        &self,
        server_id: i64,
        payload: Payload,
    ) -> Result<OperationRecord> {
        self.record_update(EntityKind::PatientRecord, server_id, payload)
            .await
    }

    pub async fn record_patient_delete(&self, server_id: i64) -> Result<OperationRecord> {
        self.record_delete(EntityKind::PatientRecord, server_id).await
    }

    async fn record_create(&self, entity: EntityKind, payload: Payload) -> Result<OperationRecord> {
        let db = self.db.lock().await;
        let tx = db.connection().transaction().await?;
        let records = LibSqlLocalRecords::new(&tx);

        let local = records.insert(entity, &payload).await?;
        let mut revert_snapshot = None;
        if entity == EntityKind::PatientRecord {
            if let Some((medicine_id, quantity)) = consumption(&payload) {
                if let Some(item) = records
                    .find_by_server_id(EntityKind::InventoryItem, medicine_id)
                    .await?
                {
                    let stock = item.integer("stock").unwrap_or(0);
                    let mut data = item.data.clone();
                    data.insert("stock".to_string(), Value::from((stock - quantity).max(0)));
                    records
                        .replace_data(EntityKind::InventoryItem, item.local_id, &data)
                        .await?;
                    revert_snapshot = Some(item.data);
                }
            }
        }

        let queued = LibSqlOperationQueue::new(&tx)
            .enqueue(&NewOperationRecord {
                kind: OperationKind::Create,
                entity,
                target_id: None,
                payload: Some(payload),
                subject_local_id: Some(local.local_id),
                revert_snapshot,
            })
            .await?;
        tx.commit().await?;
        Ok(queued)
    }

    async fn record_update(
        &self,
        entity: EntityKind,
        server_id: i64,
        payload: Payload,
    ) -> Result<OperationRecord> {
        let db = self.db.lock().await;
        let tx = db.connection().transaction().await?;
        let records = LibSqlLocalRecords::new(&tx);

        let existing = records.find_by_server_id(entity, server_id).await?;
        if let Some(record) = &existing {
            let mut data = record.data.clone();
            data.extend(payload.clone());
            records.replace_data(entity, record.local_id, &data).await?;
        }

        let queued = LibSqlOperationQueue::new(&tx)
            .enqueue(&NewOperationRecord {
                kind: OperationKind::Update,
                entity,
                target_id: Some(server_id),
                payload: Some(payload),
                subject_local_id: existing.as_ref().map(|record| record.local_id),
                revert_snapshot: existing.map(|record| record.data),
            })
            .await?;
        tx.commit().await?;
        Ok(queued)
    }

    async fn record_delete(&self, entity: EntityKind, server_id: i64) -> Result<OperationRecord> {
        let db = self.db.lock().await;
        let tx = db.connection().transaction().await?;
        let records = LibSqlLocalRecords::new(&tx);

        let existing = records.find_by_server_id(entity, server_id).await?;
        if let Some(record) = &existing {
            records.delete(entity, record.local_id).await?;
        }

        let queued = LibSqlOperationQueue::new(&tx)
            .enqueue(&NewOperationRecord {
                kind: OperationKind::Delete,
                entity,
                target_id: Some(server_id),
                payload: None,
                subject_local_id: existing.as_ref().map(|record| record.local_id),
                revert_snapshot: existing.map(|record| record.data),
            })
            .await?;
        tx.commit().await?;
        Ok(queued)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub async fn list_inventory(&self) -> Result<Vec<LocalRecord>> {
        let db = self.db.lock().await;
        LibSqlLocalRecords::new(db.connection())
            .list(EntityKind::InventoryItem)
            .await
    }

    pub async fn list_patients(&self) -> Result<Vec<LocalRecord>> {
        let db = self.db.lock().await;
        LibSqlLocalRecords::new(db.connection())
            .list(EntityKind::PatientRecord)
            .await
    }

    /// Snapshot of the queue in submission order
    pub async fn pending(&self) -> Result<Vec<OperationRecord>> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection()).list_all().await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection()).count().await
    }

    // ---------------------------------------------------------------------
    // Phase 2: confirm or revert
    // ---------------------------------------------------------------------

    /// Apply server confirmations: link created rows to their server ids and
    /// purge the confirmed entries.
    pub async fn confirm(&self, confirmed: &[Confirmation]) -> Result<usize> {
        if confirmed.is_empty() {
            return Ok(0);
        }

        let db = self.db.lock().await;
        let tx = db.connection().transaction().await?;
        let records = LibSqlLocalRecords::new(&tx);

        for confirmation in confirmed {
            if confirmation.kind != OperationKind::Create {
                continue;
            }
            if let Some(local_id) = confirmation.subject_local_id {
                records
                    .set_server_id(confirmation.entity, local_id, confirmation.server_id)
                    .await?;
            }
        }

        let ids: Vec<i64> = confirmed.iter().map(|c| c.local_id).collect();
        let removed = LibSqlOperationQueue::new(&tx).remove_batch(&ids).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Drop a queued operation and undo its local effect.
    ///
    /// Later entries for the same row are replayed over the restored
    /// snapshot, so only the discarded change disappears. Inside a process
    /// that also flushes, go through `SyncClient::discard` instead.
    pub async fn discard(&self, local_id: i64) -> Result<OperationRecord> {
        let db = self.db.lock().await;
        let tx = db.connection().transaction().await?;
        let queue = LibSqlOperationQueue::new(&tx);
        let records = LibSqlLocalRecords::new(&tx);

        let entry = queue
            .get(local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("queued operation {local_id}")))?;

        match entry.kind {
            OperationKind::Create => {
                if let Some(subject) = entry.subject_local_id {
                    records.delete(entry.entity, subject).await?;
                }
                if let (Some(before), Some((medicine_id, quantity))) = (
                    &entry.revert_snapshot,
                    entry.payload.as_ref().and_then(consumption),
                ) {
                    restore_stock(&records, before, medicine_id, quantity).await?;
                }
            }
            OperationKind::Update | OperationKind::Delete => {
                if let (Some(subject), Some(before), Some(server_id)) =
                    (entry.subject_local_id, &entry.revert_snapshot, entry.target_id)
                {
                    let later: Vec<OperationRecord> = queue
                        .list_all()
                        .await?
                        .into_iter()
                        .filter(|other| other.local_id > entry.local_id)
                        .collect();
                    let target = RowTarget {
                        entity: entry.entity,
                        local_id: subject,
                        server_id,
                    };
                    rebuild_row(&queue, &records, target, before.clone(), &later).await?;
                }
            }
        }

        queue.remove_batch(&[local_id]).await?;
        tx.commit().await?;

        tracing::warn!(
            local_id,
            action = %entry.to_operation().action(),
            "Discarded queued operation"
        );
        Ok(entry)
    }
}

/// `(medicineId, quantity)` of a patient registration, quantity defaulting to 1
fn consumption(payload: &Payload) -> Option<(i64, i64)> {
    let medicine_id = crate::apply::coerce_integer(payload.get("medicineId")?)?;
    let quantity = payload
        .get("quantity")
        .and_then(crate::apply::coerce_integer)
        .unwrap_or(1);
    Some((medicine_id, quantity.max(0)))
}

#[derive(Debug, Clone, Copy)]
struct RowTarget {
    entity: EntityKind,
    local_id: i64,
    server_id: i64,
}

/// Restore `before` and replay the later queued entries that touched the row.
///
/// Each replayed entry gets the rebuilt pre-change state as its new revert
/// snapshot.
async fn rebuild_row(
    queue: &LibSqlOperationQueue<'_>,
    records: &LibSqlLocalRecords<'_>,
    target: RowTarget,
    before: Payload,
    later: &[OperationRecord],
) -> Result<()> {
    let mut current = Some(before);
    for other in later {
        let same_row = other.entity == target.entity && other.target_id == Some(target.server_id);
        match other.kind {
            OperationKind::Update | OperationKind::Delete if same_row => {
                queue
                    .set_revert(
                        other.local_id,
                        current.as_ref().map(|_| target.local_id),
                        current.as_ref(),
                    )
                    .await?;
                current = match (other.kind, current.take()) {
                    (OperationKind::Update, Some(mut data)) => {
                        if let Some(patch) = &other.payload {
                            data.extend(patch.clone());
                        }
                        Some(data)
                    }
                    _ => None,
                };
            }
            OperationKind::Create
                if target.entity == EntityKind::InventoryItem
                    && other.entity == EntityKind::PatientRecord =>
            {
                let Some(data) = current.as_mut() else {
                    continue;
                };
                let Some((medicine_id, quantity)) = other.payload.as_ref().and_then(consumption)
                else {
                    continue;
                };
                if medicine_id != target.server_id {
                    continue;
                }
                queue
                    .set_revert(other.local_id, other.subject_local_id, Some(&*data))
                    .await?;
                let stock = data
                    .get("stock")
                    .and_then(crate::apply::coerce_integer)
                    .unwrap_or(0);
                data.insert("stock".to_string(), Value::from((stock - quantity).max(0)));
            }
            _ => {}
        }
    }

    match current {
        Some(data) => {
            records
                .restore(target.entity, target.local_id, Some(target.server_id), &data)
                .await
        }
        None => records
            .delete(target.entity, target.local_id)
            .await
            .map(|_| ()),
    }
}

/// Give back the stock a discarded registration took from the local copy
async fn restore_stock(
    records: &LibSqlLocalRecords<'_>,
    before: &Payload,
    medicine_id: i64,
    quantity: i64,
) -> Result<()> {
    let Some(item) = records
        .find_by_server_id(EntityKind::InventoryItem, medicine_id)
        .await?
    else {
        return Ok(());
    };

    let stock_before = before
        .get("stock")
        .and_then(crate::apply::coerce_integer)
        .unwrap_or(0);
    let taken = quantity.min(stock_before.max(0));
    let mut data = item.data.clone();
    data.insert(
        "stock".to_string(),
        Value::from(item.integer("stock").unwrap_or(0) + taken),
    );
    records
        .replace_data(EntityKind::InventoryItem, item.local_id, &data)
        .await
}
