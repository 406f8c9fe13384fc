//! Client side of batch synchronization
//!
//! [`SyncClient`] drains the device queue through a [`SyncTransport`] and
//! [`reconcile`] turns the reply into purges and a reportable failure.

mod client;
pub mod reconcile;
mod transport;

pub use client::{SyncClient, SyncSummary};
pub use reconcile::{BatchReply, Confirmation, ReconcilePlan, SyncFailure};
pub use transport::{HttpSyncTransport, SyncTransport, TransportError, TransportResult};
