//! Wire format of the batch sync endpoint and the single-record endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::apply::{coerce_integer, AppliedRecord, ApplyError, ApplyOutcome};
use crate::models::{EntityKind, IdempotencyKey, Operation, OperationKind, OperationRecord, Payload};

/// Classification of a rejected operation, shared by server and client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }

    /// Retrying the same operation unchanged will fail again
    pub const fn is_permanent(self) -> bool {
        !matches!(self, Self::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a batch request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub operation: OperationKind,
    pub table: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_op_id: Option<IdempotencyKey>,
}

impl From<&OperationRecord> for BatchItem {
    fn from(record: &OperationRecord) -> Self {
        Self {
            operation: record.kind,
            table: record.entity,
            record_id: record.target_id,
            payload: record.payload.clone(),
            client_op_id: Some(record.idempotency_key),
        }
    }
}

/// Top-level body check: a batch must be a JSON array
pub fn batch_items(body: &Value) -> Result<&[Value], ApplyError> {
    body.as_array().map(Vec::as_slice).ok_or_else(|| {
        ApplyError::Validation("request body must be an array of operations".to_string())
    })
}

/// Parse one raw batch entry, naming its index in any error
pub fn parse_batch_item(index: usize, value: &Value) -> Result<Operation, ApplyError> {
    let invalid = |what: &str| ApplyError::Validation(format!("{what} at index {index}"));

    let Value::Object(item) = value else {
        return Err(ApplyError::Validation(format!(
            "Operation at index {index} must be an object"
        )));
    };

    let kind: OperationKind = item
        .get("operation")
        .and_then(Value::as_str)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("Invalid operation"))?;
    let entity: EntityKind = item
        .get("table")
        .and_then(Value::as_str)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("Invalid table"))?;

    let target_id = match item.get("recordId") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(coerce_integer(raw).ok_or_else(|| invalid("recordId must be an integer"))?),
    };
    let payload = match item.get("payload") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err(invalid("payload must be an object")),
    };
    let idempotency_key = match item.get("clientOpId") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            raw.as_str()
                .and_then(|text| text.parse::<IdempotencyKey>().ok())
                .ok_or_else(|| invalid("clientOpId must be a UUID"))?,
        ),
    };

    Ok(Operation {
        kind,
        entity,
        target_id,
        payload,
        idempotency_key,
    })
}

/// Per-item success entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub index: usize,
    pub ok: bool,
    pub action: String,
    pub id: i64,
}

impl OperationResult {
    pub fn from_outcome(index: usize, outcome: &ApplyOutcome) -> Self {
        Self {
            index,
            ok: true,
            action: outcome.action(),
            id: outcome.id,
        }
    }
}

/// Body of a fully successful batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub message: String,
    pub processed: usize,
    pub results: Vec<OperationResult>,
}

impl BatchResponse {
    pub fn completed(results: Vec<OperationResult>) -> Self {
        Self {
            message: "Sync completed".to_string(),
            processed: results.len(),
            results,
        }
    }
}

/// Body of a rejected request.
///
/// `index` is set when a specific batch item failed; `results` lists the
/// items committed before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub kind: ErrorKind,
    #[serde(default)]
    pub processed: usize,
    #[serde(default)]
    pub results: Vec<OperationResult>,
}

/// Body returned by the single-record endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordResponse {
    pub ok: bool,
    pub action: String,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<AppliedRecord>,
}

impl From<ApplyOutcome> for RecordResponse {
    fn from(outcome: ApplyOutcome) -> Self {
        Self {
            ok: true,
            action: outcome.action(),
            id: outcome.id,
            data: outcome.record,
        }
    }
}
