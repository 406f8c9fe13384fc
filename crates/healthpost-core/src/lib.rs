//! healthpost-core - Core library for Healthpost
//!
//! Offline-first synchronization for maternal and child health records: the
//! models and wire protocol shared by device and server, the device-side
//! queue and sync client, and the server-side domain apply engine.

pub mod apply;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod protocol;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{EntityKind, Operation, OperationKind, OperationRecord};
