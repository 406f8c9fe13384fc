//! Deciding what a batch reply means for the local queue

use serde::Serialize;

use super::transport::{TransportError, TransportResult};
use crate::models::{EntityKind, OperationKind, OperationRecord};
use crate::protocol::{BatchErrorBody, BatchResponse, ErrorKind, OperationResult};

/// What the server said about a submitted batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    /// Every item was applied
    Completed(BatchResponse),
    /// The item at `index` was rejected; earlier items were applied
    Rejected(BatchErrorBody),
}

/// A queue entry the server has applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub local_id: i64,
    pub entity: EntityKind,
    pub kind: OperationKind,
    pub subject_local_id: Option<i64>,
    /// Id the server reported; the assigned id for a Create
    pub server_id: i64,
}

/// The queue entry a batch stopped at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub index: usize,
    pub local_id: i64,
    pub action: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncFailure {
    /// Resubmitting unchanged will fail again; the operator should discard or edit
    pub const fn is_permanent(&self) -> bool {
        self.kind.is_permanent()
    }
}

/// Local changes implied by one reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcilePlan {
    /// Entries to purge, with their server ids
    pub confirmed: Vec<Confirmation>,
    /// Entries of the batch that stay queued
    pub retained: usize,
    pub failure: Option<SyncFailure>,
}

/// Match a reply against the batch that was submitted.
///
/// Only entries the server lists as applied are confirmed; everything from
/// the failing index on stays queued, the failing entry included. A rejection
/// that lists no results confirms the updates and deletes before `index`;
/// creates there stay queued and are replayed under their idempotency key.
/// Result indices must be strictly increasing and inside the batch, otherwise
/// the reply is refused and the queue is left as it was.
pub fn plan(batch: &[OperationRecord], reply: &BatchReply) -> TransportResult<ReconcilePlan> {
    let (results, stop) = match reply {
        BatchReply::Completed(response) => (&response.results, batch.len()),
        BatchReply::Rejected(body) => (
            &body.results,
            body.index.map_or(0, |index| index.min(batch.len())),
        ),
    };
    check_indices(batch.len(), results)?;

    let confirmed: Vec<Confirmation> = match reply {
        BatchReply::Rejected(body) if body.results.is_empty() => batch[..stop]
            .iter()
            .filter_map(confirmation_by_target)
            .collect(),
        _ => results
            .iter()
            .filter(|result| result.ok && result.index < stop)
            .filter_map(|result| confirmation(batch, result))
            .collect(),
    };

    let failure = match reply {
        BatchReply::Rejected(body) => batch.get(stop).map(|record| SyncFailure {
            index: stop,
            local_id: record.local_id,
            action: record.to_operation().action(),
            kind: body.kind,
            message: body.message.clone(),
        }),
        BatchReply::Completed(_) => None,
    };

    Ok(ReconcilePlan {
        retained: batch.len().saturating_sub(confirmed.len()),
        confirmed,
        failure,
    })
}

fn check_indices(batch_len: usize, results: &[OperationResult]) -> TransportResult<()> {
    let mut previous: Option<usize> = None;
    for result in results {
        if result.index >= batch_len || previous.is_some_and(|index| result.index <= index) {
            return Err(TransportError::InvalidPayload(format!(
                "result index {} does not match a batch of {batch_len}",
                result.index
            )));
        }
        previous = Some(result.index);
    }
    Ok(())
}

/// Updates and deletes already carry the server id they were applied to
fn confirmation_by_target(record: &OperationRecord) -> Option<Confirmation> {
    if record.kind == OperationKind::Create {
        return None;
    }
    Some(Confirmation {
        local_id: record.local_id,
        entity: record.entity,
        kind: record.kind,
        subject_local_id: record.subject_local_id,
        server_id: record.target_id?,
    })
}

fn confirmation(batch: &[OperationRecord], result: &OperationResult) -> Option<Confirmation> {
    let record = batch.get(result.index)?;
    Some(Confirmation {
        local_id: record.local_id,
        entity: record.entity,
        kind: record.kind,
        subject_local_id: record.subject_local_id,
        server_id: result.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdempotencyKey;
    use pretty_assertions::assert_eq;

    fn queued(local_id: i64, kind: OperationKind) -> OperationRecord {
        OperationRecord {
            local_id,
            kind,
            entity: EntityKind::InventoryItem,
            target_id: (kind != OperationKind::Create).then_some(50),
            payload: None,
            idempotency_key: IdempotencyKey::new(),
            subject_local_id: Some(local_id * 10),
            revert_snapshot: None,
            created_at: 0,
        }
    }

    fn ok(index: usize, id: i64) -> OperationResult {
        OperationResult {
            index,
            ok: true,
            action: "inventory:POST".to_string(),
            id,
        }
    }

    #[test]
    fn completed_batch_confirms_everything() {
        let batch = vec![queued(1, OperationKind::Create), queued(2, OperationKind::Delete)];
        let reply = BatchReply::Completed(BatchResponse::completed(vec![ok(0, 100), ok(1, 50)]));

        let plan = plan(&batch, &reply).unwrap();
        assert_eq!(plan.retained, 0);
        assert_eq!(plan.failure, None);
        assert_eq!(plan.confirmed[0].server_id, 100);
        assert_eq!(plan.confirmed[0].subject_local_id, Some(10));
        assert_eq!(plan.confirmed[1].local_id, 2);
    }

    #[test]
    fn rejection_keeps_failing_entry_and_rest() {
        let batch = vec![
            queued(1, OperationKind::Create),
            queued(2, OperationKind::Create),
            queued(3, OperationKind::Create),
        ];
        let reply = BatchReply::Rejected(BatchErrorBody {
            message: "Insufficient stock for ORS. Available: 2".to_string(),
            index: Some(1),
            kind: ErrorKind::Conflict,
            processed: 1,
            results: vec![ok(0, 7)],
        });

        let plan = plan(&batch, &reply).unwrap();
        assert_eq!(plan.confirmed.len(), 1);
        assert_eq!(plan.retained, 2);
        let failure = plan.failure.unwrap();
        assert_eq!(failure.local_id, 2);
        assert_eq!(failure.index, 1);
        assert!(failure.is_permanent());
    }

    #[test]
    fn results_past_the_failure_are_ignored() {
        let batch = vec![queued(1, OperationKind::Create), queued(2, OperationKind::Create)];
        let reply = BatchReply::Rejected(BatchErrorBody {
            message: "boom".to_string(),
            index: Some(0),
            kind: ErrorKind::Internal,
            processed: 0,
            results: vec![ok(1, 9)],
        });

        let plan = plan(&batch, &reply).unwrap();
        assert!(plan.confirmed.is_empty());
        assert_eq!(plan.retained, 2);
        assert!(!plan.failure.unwrap().is_permanent());
    }

    #[test]
    fn repeated_result_index_is_refused() {
        let batch = vec![queued(1, OperationKind::Create)];
        let reply = BatchReply::Completed(BatchResponse::completed(vec![ok(0, 7), ok(0, 7)]));

        assert!(matches!(
            plan(&batch, &reply),
            Err(TransportError::InvalidPayload(_))
        ));
    }

    #[test]
    fn result_index_outside_batch_is_refused() {
        let batch = vec![queued(1, OperationKind::Create)];
        let reply = BatchReply::Completed(BatchResponse::completed(vec![ok(3, 7)]));

        assert!(matches!(
            plan(&batch, &reply),
            Err(TransportError::InvalidPayload(_))
        ));
    }

    #[test]
    fn rejection_without_results_confirms_targeted_entries_before_index() {
        let batch = vec![
            queued(1, OperationKind::Create),
            queued(2, OperationKind::Update),
            queued(3, OperationKind::Delete),
            queued(4, OperationKind::Update),
        ];
        let reply = BatchReply::Rejected(BatchErrorBody {
            message: "Record not found".to_string(),
            index: Some(3),
            kind: ErrorKind::NotFound,
            processed: 3,
            results: Vec::new(),
        });

        let plan = plan(&batch, &reply).unwrap();
        let confirmed: Vec<i64> = plan.confirmed.iter().map(|c| c.local_id).collect();
        assert_eq!(confirmed, vec![2, 3]);
        assert_eq!(plan.confirmed[0].server_id, 50);
        assert_eq!(plan.retained, 2);
        assert_eq!(plan.failure.unwrap().local_id, 4);
    }
}
