//! Transactional apply of single operations against the canonical store

use std::path::PathBuf;
use std::sync::Arc;

use libsql::TransactionBehavior;
use serde::Serialize;
use tokio::sync::Mutex;

use super::{rules, ApplyError};
use crate::db::{AppliedOperation, CanonicalRepository, Database, Schema};
use crate::models::{EntityKind, InventoryItem, Operation, OperationKind, PatientRecord};
use crate::util::{unix_millis_now, user_fingerprint};

/// Canonical row returned alongside an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AppliedRecord {
    Inventory(InventoryItem),
    Patient(PatientRecord),
}

/// Result of one successfully applied operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub entity: EntityKind,
    pub kind: OperationKind,
    /// Assigned id for a Create, the target id otherwise
    pub id: i64,
    /// The idempotency key had already been applied; nothing was written
    pub replayed: bool,
    /// Row after the change; `None` for deletes
    pub record: Option<AppliedRecord>,
}

impl ApplyOutcome {
    /// Action label, e.g. `patients:POST`
    pub fn action(&self) -> String {
        format!("{}:{}", self.entity, self.kind)
    }
}

/// Server-side engine over the canonical database.
///
/// Clones share one connection behind an async mutex, and every operation
/// runs in its own `IMMEDIATE` transaction.
#[derive(Clone)]
pub struct ApplyEngine {
    db: Arc<Mutex<Database>>,
}

impl ApplyEngine {
    /// Wrap an already opened canonical database.
    pub fn new(db: Database) -> crate::Result<Self> {
        if db.schema() != Schema::Canonical {
            return Err(crate::Error::InvalidInput(
                "apply engine needs a canonical database".to_string(),
            ));
        }
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open (creating if needed) the canonical database at `db_path`.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> crate::Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(Database::open(&db_path, Schema::Canonical).await?)
    }

    /// Open an in-memory canonical database (primarily for tests).
    pub async fn open_in_memory() -> crate::Result<Self> {
        Self::new(Database::open_in_memory(Schema::Canonical).await?)
    }

    /// Apply one operation on behalf of `caller`.
    ///
    /// Either every write of the operation commits or none does.
    pub async fn apply(&self, caller: &str, op: &Operation) -> Result<ApplyOutcome, ApplyError> {
        let db = self.db.lock().await;
        let tx = db
            .connection()
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;

        let result = Self::apply_in_tx(&tx, caller, op).await;
        match &result {
            Ok(outcome) => {
                tx.commit().await?;
                tracing::debug!(
                    action = %outcome.action(),
                    id = outcome.id,
                    replayed = outcome.replayed,
                    user = user_fingerprint(caller),
                    "Applied operation"
                );
            }
            Err(error) => {
                tx.rollback().await?;
                tracing::debug!(
                    action = %op.action(),
                    kind = error.kind().as_str(),
                    user = user_fingerprint(caller),
                    "Rejected operation: {error}"
                );
            }
        }
        result
    }

    async fn apply_in_tx(
        conn: &libsql::Connection,
        caller: &str,
        op: &Operation,
    ) -> Result<ApplyOutcome, ApplyError> {
        let repo = CanonicalRepository::new(conn);
        let now = unix_millis_now();

        if let Some(key) = &op.idempotency_key {
            if let Some(applied) = repo.find_applied(caller, key).await? {
                if applied.entity != op.entity || applied.kind != op.kind {
                    return Err(ApplyError::Conflict(format!(
                        "clientOpId {key} was already used for {}:{}",
                        applied.entity, applied.kind
                    )));
                }
                return Self::replayed(&repo, applied).await;
            }
        }

        let outcome = match (op.entity, op.kind) {
            (EntityKind::InventoryItem, OperationKind::Create) => {
                let new_item = rules::new_inventory(rules::require_payload(op)?, now)?;
                let item = repo.insert_inventory(&new_item).await?;
                fresh_outcome(op, item.id, Some(AppliedRecord::Inventory(item)))
            }
            (EntityKind::InventoryItem, OperationKind::Update) => {
                let id = rules::require_target(op)?;
                let current = Self::inventory_or_not_found(&repo, id).await?;
                let next = rules::patch_inventory(&current, rules::require_payload(op)?, now)?;
                repo.update_inventory(&next).await?;
                fresh_outcome(op, id, Some(AppliedRecord::Inventory(next)))
            }
            (EntityKind::InventoryItem, OperationKind::Delete) => {
                let id = rules::require_target(op)?;
                if !repo.delete_inventory(id).await? {
                    return Err(inventory_not_found(id));
                }
                fresh_outcome(op, id, None)
            }
            (EntityKind::PatientRecord, OperationKind::Create) => {
                let plan = rules::plan_patient_create(rules::require_payload(op)?, now)?;
                if let Some(consumption) = plan.consumption {
                    let item = repo.get_inventory(consumption.inventory_id).await?;
                    rules::check_consumption(item.as_ref(), consumption)?;
                    // Compare-and-decrement; false means stock fell below the quantity
                    if !repo
                        .try_decrement_stock(consumption.inventory_id, consumption.quantity, now)
                        .await?
                    {
                        let item = Self::inventory_or_not_found(&repo, consumption.inventory_id)
                            .await?;
                        return Err(rules::insufficient_stock(&item));
                    }
                }
                let patient = repo.insert_patient(&plan, caller).await?;
                fresh_outcome(op, patient.id, Some(AppliedRecord::Patient(patient)))
            }
            (EntityKind::PatientRecord, OperationKind::Update) => {
                let id = rules::require_target(op)?;
                let current = Self::owned_patient(&repo, id, caller).await?;
                let next = rules::patch_patient(&current, rules::require_payload(op)?, now)?;
                repo.update_patient(&next).await?;
                fresh_outcome(op, id, Some(AppliedRecord::Patient(next)))
            }
            (EntityKind::PatientRecord, OperationKind::Delete) => {
                let id = rules::require_target(op)?;
                Self::owned_patient(&repo, id, caller).await?;
                repo.delete_patient(id).await?;
                fresh_outcome(op, id, None)
            }
        };

        if let Some(key) = &op.idempotency_key {
            repo.record_applied(
                caller,
                key,
                AppliedOperation {
                    entity: outcome.entity,
                    kind: outcome.kind,
                    record_id: outcome.id,
                },
                now,
            )
            .await?;
        }
        Ok(outcome)
    }

    async fn replayed(
        repo: &CanonicalRepository<'_>,
        applied: AppliedOperation,
    ) -> Result<ApplyOutcome, ApplyError> {
        let record = match (applied.entity, applied.kind) {
            (_, OperationKind::Delete) => None,
            (EntityKind::InventoryItem, _) => repo
                .get_inventory(applied.record_id)
                .await?
                .map(AppliedRecord::Inventory),
            (EntityKind::PatientRecord, _) => repo
                .get_patient(applied.record_id)
                .await?
                .map(AppliedRecord::Patient),
        };
        Ok(ApplyOutcome {
            entity: applied.entity,
            kind: applied.kind,
            id: applied.record_id,
            replayed: true,
            record,
        })
    }

    async fn inventory_or_not_found(
        repo: &CanonicalRepository<'_>,
        id: i64,
    ) -> Result<InventoryItem, ApplyError> {
        repo.get_inventory(id)
            .await?
            .ok_or_else(|| inventory_not_found(id))
    }

    async fn owned_patient(
        repo: &CanonicalRepository<'_>,
        id: i64,
        caller: &str,
    ) -> Result<PatientRecord, ApplyError> {
        let patient = repo
            .get_patient(id)
            .await?
            .ok_or_else(|| ApplyError::NotFound(format!("patient {id} not found")))?;
        rules::authorize_owner(&patient, caller)?;
        Ok(patient)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// All inventory, newest first
    pub async fn list_inventory(&self) -> Result<Vec<InventoryItem>, ApplyError> {
        let db = self.db.lock().await;
        Ok(CanonicalRepository::new(db.connection())
            .list_inventory()
            .await?)
    }

    pub async fn get_inventory(&self, id: i64) -> Result<InventoryItem, ApplyError> {
        let db = self.db.lock().await;
        Self::inventory_or_not_found(&CanonicalRepository::new(db.connection()), id).await
    }

    /// Patients owned by `caller`, newest first
    pub async fn list_patients(&self, caller: &str) -> Result<Vec<PatientRecord>, ApplyError> {
        let db = self.db.lock().await;
        Ok(CanonicalRepository::new(db.connection())
            .list_patients(caller)
            .await?)
    }
}

fn fresh_outcome(op: &Operation, id: i64, record: Option<AppliedRecord>) -> ApplyOutcome {
    ApplyOutcome {
        entity: op.entity,
        kind: op.kind,
        id,
        replayed: false,
        record,
    }
}

fn inventory_not_found(id: i64) -> ApplyError {
    ApplyError::NotFound(format!("inventory item {id} not found"))
}
