//! Device queue -> batch protocol -> apply engine, end to end.

use std::sync::atomic::{AtomicBool, Ordering};

use healthpost_core::apply::{ApplyEngine, BatchPolicy};
use healthpost_core::models::{EntityKind, Operation, Payload};
use healthpost_core::protocol::{BatchItem, ErrorKind};
use healthpost_core::services::DeviceStore;
use healthpost_core::sync::{
    BatchReply, SyncClient, SyncSummary, SyncTransport, TransportError, TransportResult,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

/// Serves batches straight from an engine, as the HTTP server would
struct InProcess {
    engine: ApplyEngine,
    user: String,
    /// Apply the batch but report a timeout, as if the reply was lost
    drop_reply: AtomicBool,
}

impl InProcess {
    fn new(engine: &ApplyEngine, user: &str) -> Self {
        Self {
            engine: engine.clone(),
            user: user.to_string(),
            drop_reply: AtomicBool::new(false),
        }
    }
}

impl SyncTransport for InProcess {
    async fn submit(&self, batch: &[BatchItem]) -> TransportResult<BatchReply> {
        let body = serde_json::to_value(batch)
            .map_err(|error| TransportError::InvalidPayload(error.to_string()))?;
        let reply = match self
            .engine
            .apply_batch(&self.user, &body, BatchPolicy::default())
            .await
        {
            Ok(response) => BatchReply::Completed(response),
            Err(failure) if failure.index.is_some() => BatchReply::Rejected(failure.to_body()),
            Err(failure) => return Err(TransportError::Api(failure.error.to_string())),
        };

        if self.drop_reply.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout);
        }
        Ok(reply)
    }
}

struct Unplugged;

impl SyncTransport for Unplugged {
    async fn submit(&self, _batch: &[BatchItem]) -> TransportResult<BatchReply> {
        Err(TransportError::Api("connection refused".to_string()))
    }
}

fn payload(value: Value) -> Payload {
    let Value::Object(map) = value else {
        panic!("payload must be an object");
    };
    map
}

fn ors(stock: i64) -> Payload {
    payload(json!({"name": "ORS", "stock": stock, "threshold": 10, "expiryDate": "2026-01-01"}))
}

fn child_consuming(medicine_id: i64, quantity: i64) -> Payload {
    payload(json!({"name": "Baby", "type": "child", "medicineId": medicine_id, "quantity": quantity}))
}

async fn setup(user: &str) -> (ApplyEngine, SyncClient<InProcess>) {
    let engine = ApplyEngine::open_in_memory().await.unwrap();
    let store = DeviceStore::open_in_memory().await.unwrap();
    let client = SyncClient::new(store, InProcess::new(&engine, user));
    (engine, client)
}

#[tokio::test(flavor = "multi_thread")]
async fn all_queued_operations_apply_in_order() {
    let (engine, client) = setup("alice").await;
    for name in ["ORS", "Zinc", "Iron"] {
        client
            .store()
            .record_inventory_create(payload(
                json!({"name": name, "stock": 5, "threshold": 1, "expiryDate": "2027-06-30"}),
            ))
            .await
            .unwrap();
    }

    let summary = client.flush().await.unwrap();
    assert_eq!(
        summary,
        SyncSummary::Synced {
            confirmed: 3,
            pending: 0
        }
    );

    let mut names: Vec<_> = engine
        .list_inventory()
        .await
        .unwrap()
        .into_iter()
        .map(|item| (item.id, item.name))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            (1, "ORS".to_string()),
            (2, "Zinc".to_string()),
            (3, "Iron".to_string())
        ]
    );
    assert!(client
        .store()
        .list_inventory()
        .await
        .unwrap()
        .iter()
        .all(|item| item.is_synced()));
}

#[tokio::test(flavor = "multi_thread")]
async fn insufficient_stock_stops_the_batch_at_the_third_item() {
    let (engine, client) = setup("alice").await;
    let store = client.store();
    store.record_inventory_create(ors(5)).await.unwrap();
    // Fresh server: the item above becomes id 1
    store.record_patient_create(child_consuming(1, 3)).await.unwrap();
    let third = store.record_patient_create(child_consuming(1, 10)).await.unwrap();

    let summary = client.flush().await.unwrap();
    let SyncSummary::Partial {
        confirmed,
        pending,
        failure,
    } = summary.clone()
    else {
        panic!("expected a partial sync, got {summary:?}");
    };
    assert_eq!(confirmed, 2);
    assert_eq!(pending, 1);
    assert_eq!(failure.index, 2);
    assert_eq!(failure.kind, ErrorKind::Conflict);
    assert!(failure.is_permanent());

    assert_eq!(engine.get_inventory(1).await.unwrap().stock, 2);
    assert_eq!(engine.list_patients("alice").await.unwrap().len(), 1);
    assert_eq!(store.pending().await.unwrap(), vec![third]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_leaves_queue_identical() {
    let store = DeviceStore::open_in_memory().await.unwrap();
    store.record_inventory_create(ors(5)).await.unwrap();
    store.record_patient_create(child_consuming(1, 1)).await.unwrap();
    store.record_inventory_delete(7).await.unwrap();
    let before = store.pending().await.unwrap();

    let client = SyncClient::new(store, Unplugged);
    let summary = client.flush().await.unwrap();

    assert!(matches!(summary, SyncSummary::Unreachable { pending: 3, .. }));
    assert_eq!(client.store().pending().await.unwrap(), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_registrations_never_oversell_stock() {
    let engine = ApplyEngine::open_in_memory().await.unwrap();
    let item_id = engine
        .apply("alice", &Operation::create(EntityKind::InventoryItem, ors(10)))
        .await
        .unwrap()
        .id;

    let mut handles = Vec::new();
    for worker in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("worker-{worker}");
            engine
                .apply(
                    &user,
                    &Operation::create(EntityKind::PatientRecord, child_consuming(item_id, 3)),
                )
                .await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(error) => assert_eq!(error.kind(), ErrorKind::Conflict),
        }
    }

    assert_eq!(committed, 3);
    assert_eq!(engine.get_inventory(item_id).await.unwrap().stock, 10 - 3 * committed);
}

#[tokio::test(flavor = "multi_thread")]
async fn inventory_round_trip_reads_back_identical() {
    let (engine, client) = setup("alice").await;
    client.store().record_inventory_create(ors(50)).await.unwrap();
    client.flush().await.unwrap();

    let local = client.store().list_inventory().await.unwrap().remove(0);
    let item = engine.get_inventory(local.server_id.unwrap()).await.unwrap();
    let value = serde_json::to_value(&item).unwrap();

    assert_eq!(value["name"], "ORS");
    assert_eq!(value["stock"], 50);
    assert_eq!(value["threshold"], 10);
    assert_eq!(value["expiryDate"], "2026-01-01");
}

#[tokio::test(flavor = "multi_thread")]
async fn updating_another_users_patient_is_forbidden_and_stays_queued() {
    let (engine, client) = setup("alice").await;
    let bobs = engine
        .apply(
            "bob",
            &Operation::create(
                EntityKind::PatientRecord,
                payload(json!({"name": "Sita", "type": "maternal"})),
            ),
        )
        .await
        .unwrap()
        .id;

    client
        .store()
        .record_patient_update(bobs, payload(json!({"name": "Renamed"})))
        .await
        .unwrap();
    let summary = client.flush().await.unwrap();

    let SyncSummary::Partial { failure, pending, .. } = summary.clone() else {
        panic!("expected a partial sync, got {summary:?}");
    };
    assert_eq!(failure.kind, ErrorKind::Forbidden);
    assert_eq!(pending, 1);
    assert_eq!(engine.list_patients("bob").await.unwrap()[0].name, "Sita");
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_a_missing_item_is_the_stopping_point() {
    let (engine, client) = setup("alice").await;
    let store = client.store();
    store.record_inventory_create(ors(1)).await.unwrap();
    store.record_inventory_delete(999).await.unwrap();
    store.record_inventory_create(ors(2)).await.unwrap();

    let summary = client.flush().await.unwrap();
    let SyncSummary::Partial {
        confirmed,
        pending,
        failure,
    } = summary.clone()
    else {
        panic!("expected a partial sync, got {summary:?}");
    };
    assert_eq!(confirmed, 1);
    assert_eq!(pending, 2);
    assert_eq!(failure.kind, ErrorKind::NotFound);
    assert_eq!(failure.action, "inventory:DELETE");
    assert_eq!(engine.list_inventory().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_reply_replay_does_not_double_apply() {
    let (engine, client) = setup("alice").await;
    let item_id = engine
        .apply("alice", &Operation::create(EntityKind::InventoryItem, ors(5)))
        .await
        .unwrap()
        .id;
    client
        .store()
        .record_patient_create(child_consuming(item_id, 2))
        .await
        .unwrap();

    client.transport().drop_reply.store(true, Ordering::SeqCst);
    let summary = client.flush().await.unwrap();
    assert!(matches!(summary, SyncSummary::Unreachable { pending: 1, .. }));

    client.transport().drop_reply.store(false, Ordering::SeqCst);
    let summary = client.flush().await.unwrap();
    assert!(matches!(summary, SyncSummary::Synced { confirmed: 1, .. }));

    assert_eq!(engine.get_inventory(item_id).await.unwrap().stock, 3);
    assert_eq!(engine.list_patients("alice").await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn discarding_the_failed_entry_unblocks_the_queue() {
    let (engine, client) = setup("alice").await;
    let store = client.store();
    let doomed = store.record_inventory_delete(999).await.unwrap();
    store.record_inventory_create(ors(4)).await.unwrap();

    let summary = client.flush().await.unwrap();
    assert!(matches!(summary, SyncSummary::Partial { confirmed: 0, .. }));

    store.discard(doomed.local_id).await.unwrap();
    let summary = client.flush().await.unwrap();
    assert_eq!(
        summary,
        SyncSummary::Synced {
            confirmed: 1,
            pending: 0
        }
    );
    assert_eq!(engine.list_inventory().await.unwrap().len(), 1);
}
