use std::path::{Path, PathBuf};

use healthpost_core::models::{LocalRecord, OperationRecord, Payload};
use healthpost_core::services::DeviceStore;
use healthpost_core::sync::SyncSummary;
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub local_id: i64,
    pub server_id: Option<i64>,
    pub synced: bool,
    pub data: Payload,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct QueueListItem {
    pub local_id: i64,
    pub action: String,
    pub target_id: Option<i64>,
    pub client_op_id: String,
    pub created_at: i64,
    pub created_at_iso: String,
}

pub fn record_to_list_item(record: &LocalRecord) -> RecordListItem {
    RecordListItem {
        local_id: record.local_id,
        server_id: record.server_id,
        synced: record.is_synced(),
        data: record.data.clone(),
        updated_at: record.updated_at,
    }
}

pub fn queue_to_list_item(entry: &OperationRecord) -> QueueListItem {
    QueueListItem {
        local_id: entry.local_id,
        action: entry.to_operation().action(),
        target_id: entry.target_id,
        client_op_id: entry.idempotency_key.to_string(),
        created_at: entry.created_at,
        created_at_iso: format_timestamp(entry.created_at),
    }
}

pub fn format_inventory_lines(items: &[LocalRecord], now_ms: i64) -> Vec<String> {
    let today = chrono::DateTime::from_timestamp_millis(now_ms).map(|now| now.date_naive());
    items
        .iter()
        .map(|record| {
            let Some(item) = record.inventory_view() else {
                return format!(
                    "{}  {}  (incomplete)  {}",
                    sync_label(record),
                    record.name().unwrap_or("(unnamed)"),
                    local_label(record),
                );
            };
            let mut flags = String::new();
            if item.is_low_stock() {
                flags.push_str(" (low)");
            }
            if today.is_some_and(|today| item.is_expired(today)) {
                flags.push_str(" (expired)");
            }
            format!(
                "{}  {}  stock {}{flags}  exp {}  {}  {}",
                sync_label(record),
                item.name,
                item.stock,
                item.expiry_date,
                format_relative_time(record.updated_at, now_ms),
                local_label(record),
            )
        })
        .collect()
}

pub fn format_patient_lines(patients: &[LocalRecord], now_ms: i64) -> Vec<String> {
    patients
        .iter()
        .map(|patient| {
            let patient_type = patient
                .data
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("?");
            format!(
                "{}  {} ({patient_type})  {}  {}",
                sync_label(patient),
                patient.name().unwrap_or("(unnamed)"),
                format_relative_time(patient.updated_at, now_ms),
                local_label(patient),
            )
        })
        .collect()
}

pub fn format_queue_lines(entries: &[OperationRecord], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let target = entry
                .target_id
                .map_or_else(|| "-".to_string(), |id| format!("#{id}"));
            format!(
                "{:>4}  {:<18} {:<6} {}",
                entry.local_id,
                entry.to_operation().action(),
                target,
                format_relative_time(entry.created_at, now_ms)
            )
        })
        .collect()
}

pub fn format_sync_summary(summary: &SyncSummary) -> Vec<String> {
    match summary {
        SyncSummary::Idle => vec!["Nothing to sync".to_string()],
        SyncSummary::Synced { confirmed, pending } => {
            let mut lines = vec![format!("Sync completed: {confirmed} confirmed")];
            if *pending > 0 {
                lines.push(format!("{pending} operation(s) queued since; run sync again"));
            }
            lines
        }
        SyncSummary::Partial {
            confirmed,
            pending,
            failure,
        } => {
            let mut lines = vec![
                format!("Sync stopped: {confirmed} confirmed, {pending} still pending"),
                format!(
                    "Operation {} ({}) failed [{}]: {}",
                    failure.local_id, failure.action, failure.kind, failure.message
                ),
            ];
            if failure.is_permanent() {
                lines.push(format!(
                    "Retrying will not help; fix the record or run `healthpost queue discard {}`",
                    failure.local_id
                ));
            } else {
                lines.push("The server may recover; retry later".to_string());
            }
            lines
        }
        SyncSummary::Unreachable { pending, reason } => vec![format!(
            "Sync failed, will retry: {reason} ({pending} pending)"
        )],
    }
}

fn sync_label(record: &LocalRecord) -> String {
    record
        .server_id
        .map_or_else(|| "pending ".to_string(), |id| format!("#{id:<7}"))
}

fn local_label(record: &LocalRecord) -> String {
    format!("(local {})", record.local_id)
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map_or_else(|| timestamp_ms.to_string(), |value| value.to_rfc3339())
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn normalize_name(name: &str) -> Result<String, CliError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyName);
    }
    Ok(trimmed.to_string())
}

/// Parse `KEY=VALUE`; VALUE is taken as JSON when it parses, as text otherwise.
pub fn parse_field(raw: &str) -> Result<(String, Value), CliError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::InvalidField(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::InvalidField(raw.to_string()));
    }

    let value = value.trim();
    let parsed = serde_json::from_str::<Value>(value)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), parsed))
}

pub fn apply_fields(payload: &mut Payload, fields: &[String]) -> Result<(), CliError> {
    for raw in fields {
        let (key, value) = parse_field(raw)?;
        payload.insert(key, value);
    }
    Ok(())
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path.unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("healthpost")
        .join("healthpost.db")
}

pub async fn open_store(path: &Path) -> Result<DeviceStore, CliError> {
    Ok(DeviceStore::open_path(path).await?)
}
