//! Ordered, fail-fast batch application

use serde_json::Value;

use super::{ApplyEngine, ApplyError};
use crate::models::{EntityKind, Operation, OperationKind};
use crate::protocol::{batch_items, parse_batch_item, BatchErrorBody, BatchResponse, OperationResult};
use crate::util::user_fingerprint;

/// Server-configurable limits on the batch endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Allow patient PUT/DELETE inside a batch
    pub bulk_patient_mutations: bool,
    pub max_batch_size: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            bulk_patient_mutations: true,
            max_batch_size: 500,
        }
    }
}

impl BatchPolicy {
    /// Reject operations this server does not accept in bulk
    pub fn ensure_supported(&self, index: usize, op: &Operation) -> Result<(), ApplyError> {
        if !self.bulk_patient_mutations
            && op.entity == EntityKind::PatientRecord
            && op.kind != OperationKind::Create
        {
            return Err(ApplyError::Validation(format!(
                "unsupported operation for this entity: patients only supports POST in bulk sync (index {index})"
            )));
        }
        Ok(())
    }
}

/// A batch stopped at its first failing item.
///
/// Items before `index` stay committed.
#[derive(Debug)]
pub struct BatchFailure {
    /// `None` when the request was rejected before any item was looked at
    pub index: Option<usize>,
    pub error: ApplyError,
    pub committed: Vec<OperationResult>,
}

impl BatchFailure {
    fn rejected(error: ApplyError) -> Self {
        Self {
            index: None,
            error,
            committed: Vec::new(),
        }
    }

    pub fn to_body(&self) -> BatchErrorBody {
        BatchErrorBody {
            message: self.error.to_string(),
            index: self.index,
            kind: self.error.kind(),
            processed: self.committed.len(),
            results: self.committed.clone(),
        }
    }
}

impl ApplyEngine {
    /// Apply a raw batch body strictly in order, each item in its own transaction.
    ///
    /// Stops at the first invalid or rejected item; there is no compensation
    /// for the items already committed.
    pub async fn apply_batch(
        &self,
        caller: &str,
        body: &Value,
        policy: BatchPolicy,
    ) -> Result<BatchResponse, BatchFailure> {
        let items = batch_items(body).map_err(BatchFailure::rejected)?;
        if items.len() > policy.max_batch_size {
            return Err(BatchFailure::rejected(ApplyError::Validation(format!(
                "batch of {} operations exceeds the limit of {}",
                items.len(),
                policy.max_batch_size
            ))));
        }

        let mut results = Vec::with_capacity(items.len());
        for (index, raw) in items.iter().enumerate() {
            let applied = match parse_batch_item(index, raw) {
                Ok(op) => match policy.ensure_supported(index, &op) {
                    Ok(()) => self.apply(caller, &op).await,
                    Err(error) => Err(error),
                },
                Err(error) => Err(error),
            };

            match applied {
                Ok(outcome) => results.push(OperationResult::from_outcome(index, &outcome)),
                Err(error) => {
                    tracing::warn!(
                        index,
                        processed = results.len(),
                        kind = error.kind().as_str(),
                        user = user_fingerprint(caller),
                        "Batch stopped: {error}"
                    );
                    return Err(BatchFailure {
                        index: Some(index),
                        error,
                        committed: results,
                    });
                }
            }
        }

        tracing::info!(
            processed = results.len(),
            user = user_fingerprint(caller),
            "Batch applied"
        );
        Ok(BatchResponse::completed(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ors(stock: i64) -> Value {
        json!({"operation": "POST", "table": "inventory",
               "payload": {"name": "ORS", "stock": stock, "threshold": 1, "expiryDate": "2026-01-01"}})
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_all_items_succeed_in_order() {
        let engine = ApplyEngine::open_in_memory().await.unwrap();
        let body = json!([ors(5), ors(7)]);

        let response = engine
            .apply_batch("alice", &body, BatchPolicy::default())
            .await
            .unwrap();

        assert_eq!(response.message, "Sync completed");
        assert_eq!(response.processed, 2);
        assert_eq!(response.results[0].index, 0);
        assert_eq!(response.results[1].action, "inventory:POST");
        assert!(response.results[0].id < response.results[1].id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stops_at_first_failure_and_keeps_earlier_commits() {
        let engine = ApplyEngine::open_in_memory().await.unwrap();
        let body = json!([
            ors(5),
            {"operation": "DELETE", "table": "inventory", "recordId": 999},
            ors(9),
        ]);

        let failure = engine
            .apply_batch("alice", &body, BatchPolicy::default())
            .await
            .unwrap_err();

        assert_eq!(failure.index, Some(1));
        assert_eq!(failure.error.kind(), ErrorKind::NotFound);
        assert_eq!(failure.committed.len(), 1);
        // Item after the failure was never applied
        assert_eq!(engine.list_inventory().await.unwrap().len(), 1);

        let body = failure.to_body();
        assert_eq!(body.processed, 1);
        assert_eq!(body.index, Some(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_item_fails_at_its_index() {
        let engine = ApplyEngine::open_in_memory().await.unwrap();
        let body = json!([ors(1), {"operation": "POST", "table": "doctors"}]);

        let failure = engine
            .apply_batch("alice", &body, BatchPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(failure.index, Some(1));
        assert_eq!(failure.error.to_string(), "Invalid table at index 1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_non_array_body_rejected_before_processing() {
        let engine = ApplyEngine::open_in_memory().await.unwrap();
        let failure = engine
            .apply_batch("alice", &ors(1), BatchPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(failure.index, None);
        assert_eq!(failure.error.kind(), ErrorKind::Validation);
        assert!(engine.list_inventory().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_oversized_batch_rejected() {
        let engine = ApplyEngine::open_in_memory().await.unwrap();
        let policy = BatchPolicy {
            max_batch_size: 1,
            ..BatchPolicy::default()
        };
        let failure = engine
            .apply_batch("alice", &json!([ors(1), ors(2)]), policy)
            .await
            .unwrap_err();
        assert_eq!(failure.index, None);
        assert!(engine.list_inventory().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_patient_mutations_can_be_disabled_in_bulk() {
        let engine = ApplyEngine::open_in_memory().await.unwrap();
        let policy = BatchPolicy {
            bulk_patient_mutations: false,
            ..BatchPolicy::default()
        };
        let body = json!([
            {"operation": "POST", "table": "patients", "payload": {"name": "Sita", "type": "maternal"}},
            {"operation": "DELETE", "table": "patients", "recordId": 1},
        ]);

        let failure = engine.apply_batch("alice", &body, policy).await.unwrap_err();
        assert_eq!(failure.index, Some(1));
        assert_eq!(failure.error.kind(), ErrorKind::Validation);
        assert_eq!(engine.list_patients("alice").await.unwrap().len(), 1);
    }
}
