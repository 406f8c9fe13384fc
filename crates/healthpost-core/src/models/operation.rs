//! Operation model: the unit of deferred work

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// JSON object carried by an operation.
pub type Payload = Map<String, Value>;

/// What an operation does to its entity.
///
/// Serialized with the HTTP verb names used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    #[serde(rename = "POST")]
    Create,
    #[serde(rename = "PUT")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl OperationKind {
    /// Wire name (`POST`, `PUT`, `DELETE`)
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "POST",
            Self::Update => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POST" => Ok(Self::Create),
            "PUT" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Entity an operation targets. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "inventory")]
    InventoryItem,
    #[serde(rename = "patients")]
    PatientRecord,
}

impl EntityKind {
    /// Wire/table name (`inventory`, `patients`)
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InventoryItem => "inventory",
            Self::PatientRecord => "patients",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inventory" => Ok(Self::InventoryItem),
            "patients" => Ok(Self::PatientRecord),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Returned when parsing an operation or entity name that is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value `{0}`")]
pub struct UnknownVariant(pub String);

/// Stable token attached to a queued operation so the server can recognise replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    /// Create a new key using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this key
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdempotencyKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A mutation request as the apply engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub entity: EntityKind,
    /// Server id, present for Update/Delete
    pub target_id: Option<i64>,
    /// Absent for Delete
    pub payload: Option<Payload>,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl Operation {
    pub fn create(entity: EntityKind, payload: Payload) -> Self {
        Self {
            kind: OperationKind::Create,
            entity,
            target_id: None,
            payload: Some(payload),
            idempotency_key: None,
        }
    }

    pub fn update(entity: EntityKind, target_id: i64, payload: Payload) -> Self {
        Self {
            kind: OperationKind::Update,
            entity,
            target_id: Some(target_id),
            payload: Some(payload),
            idempotency_key: None,
        }
    }

    pub fn delete(entity: EntityKind, target_id: i64) -> Self {
        Self {
            kind: OperationKind::Delete,
            entity,
            target_id: Some(target_id),
            payload: None,
            idempotency_key: None,
        }
    }

    #[must_use]
    pub const fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Action label reported back to clients, e.g. `inventory:POST`
    pub fn action(&self) -> String {
        format!("{}:{}", self.entity, self.kind)
    }
}

/// An operation waiting in the local queue.
///
/// Immutable once queued; removed on confirmation or operator discard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Assigned by the local queue at enqueue time
    pub local_id: i64,
    pub kind: OperationKind,
    pub entity: EntityKind,
    pub target_id: Option<i64>,
    pub payload: Option<Payload>,
    pub idempotency_key: IdempotencyKey,
    /// Local record row the operation was recorded against
    pub subject_local_id: Option<i64>,
    /// Local row contents before an Update/Delete, or the consumed inventory
    /// row before a patient Create; used to revert on discard
    pub revert_snapshot: Option<Payload>,
    /// Enqueue timestamp (Unix ms), ordering/debugging only
    pub created_at: i64,
}

impl OperationRecord {
    /// The request that will be submitted for this queue entry.
    pub fn to_operation(&self) -> Operation {
        Operation {
            kind: self.kind,
            entity: self.entity,
            target_id: self.target_id,
            payload: self.payload.clone(),
            idempotency_key: Some(self.idempotency_key),
        }
    }
}

/// An operation about to be queued; the queue assigns `local_id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperationRecord {
    pub kind: OperationKind,
    pub entity: EntityKind,
    pub target_id: Option<i64>,
    pub payload: Option<Payload>,
    pub subject_local_id: Option<i64>,
    pub revert_snapshot: Option<Payload>,
}
