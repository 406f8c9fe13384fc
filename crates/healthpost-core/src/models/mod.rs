//! Data models for Healthpost

mod inventory;
mod local;
mod operation;
mod patient;

pub use inventory::{InventoryItem, NewInventoryItem};
pub use local::LocalRecord;
pub use operation::{
    EntityKind, IdempotencyKey, NewOperationRecord, Operation, OperationKind, OperationRecord,
    Payload, UnknownVariant,
};
pub use patient::{
    ChildDetails, Consumption, MaternalDetails, NewPatientRecord, PatientDetails, PatientRecord,
    PatientType,
};
