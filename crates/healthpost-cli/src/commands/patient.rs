use std::path::Path;

use healthpost_core::models::Payload;
use healthpost_core::util::unix_millis_now;
use serde_json::Value;

use crate::cli::{PatientCommands, PatientTypeArg};
use crate::commands::common::{
    apply_fields, format_patient_lines, normalize_name, open_store, record_to_list_item,
    RecordListItem,
};
use crate::error::CliError;

pub async fn run_patient(command: PatientCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        PatientCommands::Register {
            name,
            patient_type,
            medicine_id,
            quantity,
            fields,
        } => {
            let payload = registration(&name, patient_type, medicine_id, quantity, &fields)?;
            let entry = open_store(db_path)
                .await?
                .record_patient_create(payload)
                .await?;
            println!("Queued {} as operation {}", entry.entity, entry.local_id);
        }
        PatientCommands::Update { id, name, fields } => {
            let mut payload = Payload::new();
            if let Some(name) = name {
                payload.insert("name".to_string(), Value::String(normalize_name(&name)?));
            }
            apply_fields(&mut payload, &fields)?;
            if payload.is_empty() {
                return Err(CliError::NothingToUpdate);
            }

            let entry = open_store(db_path)
                .await?
                .record_patient_update(id, payload)
                .await?;
            println!("Queued update of patient #{id} as operation {}", entry.local_id);
        }
        PatientCommands::Delete { id } => {
            let entry = open_store(db_path).await?.record_patient_delete(id).await?;
            println!("Queued delete of patient #{id} as operation {}", entry.local_id);
        }
        PatientCommands::List { json } => {
            let patients = open_store(db_path).await?.list_patients().await?;
            if json {
                let json_items = patients
                    .iter()
                    .map(record_to_list_item)
                    .collect::<Vec<RecordListItem>>();
                println!("{}", serde_json::to_string_pretty(&json_items)?);
            } else if patients.is_empty() {
                println!("No patients on this device.");
            } else {
                for line in format_patient_lines(&patients, unix_millis_now()) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

/// Build a registration payload; explicit flags win over `--field` entries.
pub fn registration(
    name: &str,
    patient_type: PatientTypeArg,
    medicine_id: Option<i64>,
    quantity: Option<i64>,
    fields: &[String],
) -> Result<Payload, CliError> {
    let mut payload = Payload::new();
    apply_fields(&mut payload, fields)?;
    payload.insert("name".to_string(), Value::String(normalize_name(name)?));
    payload.insert(
        "type".to_string(),
        Value::String(patient_type.as_str().to_string()),
    );
    if let Some(medicine_id) = medicine_id {
        payload.insert("medicineId".to_string(), Value::from(medicine_id));
        payload.insert("quantity".to_string(), Value::from(quantity.unwrap_or(1)));
    }
    Ok(payload)
}
