//! Queue flushing driver

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;

use super::reconcile::{self, SyncFailure};
use super::transport::SyncTransport;
use crate::models::OperationRecord;
use crate::protocol::BatchItem;
use crate::services::DeviceStore;
use crate::Result;

/// What a flush achieved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncSummary {
    /// Queue was empty; no request was made
    Idle,
    /// Every submitted entry was confirmed
    Synced { confirmed: usize, pending: usize },
    /// The server stopped at `failure`; it and later entries stay queued
    Partial {
        confirmed: usize,
        pending: usize,
        failure: SyncFailure,
    },
    /// The batch could not be delivered; the queue is unchanged
    Unreachable { pending: usize, reason: String },
}

impl SyncSummary {
    /// Entries still waiting after the flush
    pub const fn pending(&self) -> usize {
        match self {
            Self::Idle => 0,
            Self::Synced { pending, .. }
            | Self::Partial { pending, .. }
            | Self::Unreachable { pending, .. } => *pending,
        }
    }
}

/// Drains a device queue through a transport, one flush at a time.
pub struct SyncClient<T> {
    store: DeviceStore,
    transport: T,
    gate: Mutex<()>,
    online: AtomicBool,
}

impl<T: SyncTransport> SyncClient<T> {
    /// The client starts out assuming it is offline
    pub fn new(store: DeviceStore, transport: T) -> Self {
        Self {
            store,
            transport,
            gate: Mutex::new(()),
            online: AtomicBool::new(false),
        }
    }

    pub const fn store(&self) -> &DeviceStore {
        &self.store
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Submit the current queue snapshot and reconcile the reply.
    ///
    /// Concurrent callers wait for the running flush, then flush what is left.
    pub async fn flush(&self) -> Result<SyncSummary> {
        let _gate = self.gate.lock().await;

        let batch = self.store.pending().await?;
        if batch.is_empty() {
            return Ok(SyncSummary::Idle);
        }

        let items: Vec<BatchItem> = batch.iter().map(BatchItem::from).collect();
        tracing::debug!(operations = items.len(), "Submitting sync batch");

        let submitted = self.transport.submit(&items).await;
        let plan = match submitted.and_then(|reply| reconcile::plan(&batch, &reply)) {
            Ok(plan) => plan,
            Err(error) => {
                tracing::warn!(pending = batch.len(), "Sync failed, will retry: {error}");
                return Ok(SyncSummary::Unreachable {
                    pending: batch.len(),
                    reason: error.to_string(),
                });
            }
        };

        let confirmed = self.store.confirm(&plan.confirmed).await?;
        let pending = self.store.pending_count().await?;

        match plan.failure {
            Some(failure) => {
                tracing::warn!(
                    confirmed,
                    pending,
                    local_id = failure.local_id,
                    action = %failure.action,
                    kind = failure.kind.as_str(),
                    permanent = failure.is_permanent(),
                    "Sync stopped at failing operation: {}",
                    failure.message
                );
                Ok(SyncSummary::Partial {
                    confirmed,
                    pending,
                    failure,
                })
            }
            None => {
                if plan.retained > 0 {
                    tracing::warn!(
                        retained = plan.retained,
                        "Server confirmed fewer operations than submitted"
                    );
                }
                tracing::info!(confirmed, pending, "Sync completed");
                Ok(SyncSummary::Synced { confirmed, pending })
            }
        }
    }

    /// Drop a queued operation once no flush is in flight.
    ///
    /// Confirmations for a reply are never applied to a row that was reverted
    /// while the batch was on the wire.
    pub async fn discard(&self, local_id: i64) -> Result<OperationRecord> {
        let _gate = self.gate.lock().await;
        self.store.discard(local_id).await
    }

    /// Record a connectivity change; coming back online triggers a flush.
    pub async fn on_connectivity_change(&self, online: bool) -> Result<Option<SyncSummary>> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            tracing::info!("Connectivity restored, flushing queue");
            return self.flush().await.map(Some);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use crate::protocol::{BatchResponse, OperationResult};
    use crate::sync::{BatchReply, TransportError, TransportResult};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    /// Confirms every item with id `1000 + index`
    #[derive(Default)]
    struct AcceptAll {
        calls: AtomicUsize,
    }

    impl SyncTransport for AcceptAll {
        async fn submit(&self, batch: &[BatchItem]) -> TransportResult<BatchReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let results = (0..batch.len())
                .map(|index| OperationResult {
                    index,
                    ok: true,
                    action: format!("{}:{}", batch[index].table, batch[index].operation),
                    id: 1000 + i64::try_from(index).unwrap(),
                })
                .collect();
            Ok(BatchReply::Completed(BatchResponse::completed(results)))
        }
    }

    struct Offline;

    impl SyncTransport for Offline {
        async fn submit(&self, _batch: &[BatchItem]) -> TransportResult<BatchReply> {
            Err(TransportError::Timeout)
        }
    }

    fn payload(value: Value) -> Payload {
        let Value::Object(map) = value else {
            panic!("payload must be an object");
        };
        map
    }

    async fn store_with(n: usize) -> DeviceStore {
        let store = DeviceStore::open_in_memory().await.unwrap();
        for i in 0..n {
            store
                .record_inventory_create(payload(json!({"name": format!("item {i}")})))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_queue_skips_network() {
        let client = SyncClient::new(store_with(0).await, AcceptAll::default());
        assert_eq!(client.flush().await.unwrap(), SyncSummary::Idle);
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirmed_creates_get_server_ids() {
        let client = SyncClient::new(store_with(2).await, AcceptAll::default());
        let summary = client.flush().await.unwrap();

        assert_eq!(
            summary,
            SyncSummary::Synced {
                confirmed: 2,
                pending: 0
            }
        );
        let items = client.store().list_inventory().await.unwrap();
        assert_eq!(items[0].server_id, Some(1000));
        assert_eq!(items[1].server_id, Some(1001));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transport_failure_leaves_queue_untouched() {
        let store = store_with(3).await;
        let before = store.pending().await.unwrap();
        let client = SyncClient::new(store, Offline);

        let summary = client.flush().await.unwrap();
        assert!(matches!(summary, SyncSummary::Unreachable { pending: 3, .. }));
        assert_eq!(client.store().pending().await.unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_flushes_are_serialized() {
        let client = SyncClient::new(store_with(2).await, AcceptAll::default());

        let (first, second) = tokio::join!(client.flush(), client.flush());
        let mut summaries = [first.unwrap(), second.unwrap()];
        summaries.sort_by_key(|summary| matches!(summary, SyncSummary::Idle));

        assert_eq!(
            summaries[0],
            SyncSummary::Synced {
                confirmed: 2,
                pending: 0
            }
        );
        assert_eq!(summaries[1], SyncSummary::Idle);
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flushes_only_when_coming_online() {
        let client = SyncClient::new(store_with(1).await, AcceptAll::default());

        assert_eq!(client.on_connectivity_change(false).await.unwrap(), None);
        let summary = client.on_connectivity_change(true).await.unwrap();
        assert!(matches!(summary, Some(SyncSummary::Synced { confirmed: 1, .. })));

        // Already online: no transition, no flush
        assert_eq!(client.on_connectivity_change(true).await.unwrap(), None);
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 1);
    }

    /// Lists index 0 twice
    struct RepeatsFirst;

    impl SyncTransport for RepeatsFirst {
        async fn submit(&self, batch: &[BatchItem]) -> TransportResult<BatchReply> {
            let first = OperationResult {
                index: 0,
                ok: true,
                action: format!("{}:{}", batch[0].table, batch[0].operation),
                id: 1000,
            };
            Ok(BatchReply::Completed(BatchResponse::completed(vec![
                first.clone(),
                first,
            ])))
        }
    }

    /// Holds the batch until released
    struct Held {
        release: tokio::sync::Notify,
        submitted: tokio::sync::Notify,
    }

    impl SyncTransport for Held {
        async fn submit(&self, batch: &[BatchItem]) -> TransportResult<BatchReply> {
            self.submitted.notify_one();
            self.release.notified().await;
            AcceptAll::default().submit(batch).await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_reply_leaves_queue_untouched() {
        let store = store_with(1).await;
        let before = store.pending().await.unwrap();
        let client = SyncClient::new(store, RepeatsFirst);

        let summary = client.flush().await.unwrap();
        assert!(matches!(summary, SyncSummary::Unreachable { pending: 1, .. }));
        assert_eq!(client.store().pending().await.unwrap(), before);
        assert_eq!(client.store().list_inventory().await.unwrap()[0].server_id, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discard_waits_for_flush_in_flight() {
        let store = store_with(1).await;
        let queued = store.pending().await.unwrap().remove(0);
        let client = SyncClient::new(
            store,
            Held {
                release: tokio::sync::Notify::new(),
                submitted: tokio::sync::Notify::new(),
            },
        );

        let discard_then_release = async {
            client.transport.submitted.notified().await;
            let blocked = tokio::time::timeout(
                std::time::Duration::from_millis(50),
                client.discard(queued.local_id),
            )
            .await;
            assert!(blocked.is_err(), "discard ran while the batch was in flight");
            client.transport.release.notify_one();
        };
        let (summary, ()) = tokio::join!(client.flush(), discard_then_release);
        assert!(matches!(summary.unwrap(), SyncSummary::Synced { confirmed: 1, .. }));

        // The flush purged the entry, so there is nothing left to discard
        assert!(matches!(
            client.discard(queued.local_id).await.unwrap_err(),
            crate::Error::NotFound(_)
        ));
        assert_eq!(client.store().list_inventory().await.unwrap()[0].server_id, Some(1000));
    }
}
