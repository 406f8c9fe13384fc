//! Business rules for inventory and patient mutations
//!
//! Everything here is a pure function of the payload and the current row.
//! The engine performs the reads before and the writes after.

use super::payload::PayloadReader;
use super::ApplyError;
use crate::models::{
    ChildDetails, Consumption, InventoryItem, MaternalDetails, NewInventoryItem,
    NewPatientRecord, Operation, Payload, PatientDetails, PatientRecord, PatientType,
};

/// Payload of a Create or Update
pub fn require_payload(op: &Operation) -> Result<&Payload, ApplyError> {
    op.payload
        .as_ref()
        .ok_or_else(|| ApplyError::Validation("payload must be an object".to_string()))
}

/// Server id targeted by an Update or Delete
pub fn require_target(op: &Operation) -> Result<i64, ApplyError> {
    op.target_id
        .ok_or_else(|| ApplyError::Validation("recordId must be an integer".to_string()))
}

// -------------------------------------------------------------------------
// Inventory
// -------------------------------------------------------------------------

pub fn new_inventory(payload: &Payload, now: i64) -> Result<NewInventoryItem, ApplyError> {
    let reader = PayloadReader::new(payload);
    Ok(NewInventoryItem {
        name: reader.required_text("name")?,
        stock: non_negative("stock", reader.required_integer("stock")?)?,
        threshold: non_negative("threshold", reader.required_integer("threshold")?)?,
        expiry_date: reader.required_date("expiryDate")?,
        created_at: reader.optional_timestamp("createdAt")?.unwrap_or(now),
    })
}

/// Apply the fields present in `payload`; the rest keep their current values
pub fn patch_inventory(
    current: &InventoryItem,
    payload: &Payload,
    now: i64,
) -> Result<InventoryItem, ApplyError> {
    let reader = PayloadReader::new(payload);
    let mut next = current.clone();

    if reader.contains("name") {
        next.name = reader.required_text("name")?;
    }
    if reader.contains("stock") {
        next.stock = non_negative("stock", reader.required_integer("stock")?)?;
    }
    if reader.contains("threshold") {
        next.threshold = non_negative("threshold", reader.required_integer("threshold")?)?;
    }
    if reader.contains("expiryDate") {
        next.expiry_date = reader.required_date("expiryDate")?;
    }
    next.updated_at = reader.optional_timestamp("updatedAt")?.unwrap_or(now);

    Ok(next)
}

fn non_negative(field: &str, value: i64) -> Result<i64, ApplyError> {
    if value < 0 {
        return Err(ApplyError::Validation(format!("{field} must be >= 0")));
    }
    Ok(value)
}

// -------------------------------------------------------------------------
// Patients
// -------------------------------------------------------------------------

/// Validate a patient registration.
///
/// Fields that belong to the other register are dropped without error.
pub fn plan_patient_create(payload: &Payload, now: i64) -> Result<NewPatientRecord, ApplyError> {
    let reader = PayloadReader::new(payload);
    let name = reader.required_text("name")?;
    let patient_type = patient_type(&reader)?
        .ok_or_else(|| ApplyError::Validation("type is required (maternal|child)".to_string()))?;

    let quantity = reader.optional_integer("quantity")?.unwrap_or(1);
    if quantity <= 0 {
        return Err(ApplyError::Validation("quantity must be > 0".to_string()));
    }
    let consumption = reader
        .optional_integer("medicineId")?
        .map(|inventory_id| Consumption {
            inventory_id,
            quantity,
        });

    Ok(NewPatientRecord {
        name,
        details: patch_details(PatientDetails::empty(patient_type), &reader)?,
        consumption,
        quantity,
        created_at: reader.optional_timestamp("createdAt")?.unwrap_or(now),
    })
}

/// Stock check for a registration that consumes an inventory item
pub fn check_consumption(
    item: Option<&InventoryItem>,
    consumption: Consumption,
) -> Result<(), ApplyError> {
    let item = item.ok_or_else(|| {
        ApplyError::NotFound(format!(
            "medicineId {} not found",
            consumption.inventory_id
        ))
    })?;
    if item.stock < consumption.quantity {
        return Err(insufficient_stock(item));
    }
    Ok(())
}

pub fn insufficient_stock(item: &InventoryItem) -> ApplyError {
    ApplyError::Conflict(format!(
        "Insufficient stock for {}. Available: {}",
        item.name, item.stock
    ))
}

/// Only the owner may read, change or remove a patient record
pub fn authorize_owner(patient: &PatientRecord, caller: &str) -> Result<(), ApplyError> {
    if !patient.is_owned_by(caller) {
        return Err(ApplyError::Forbidden(format!(
            "patient {} belongs to another user",
            patient.id
        )));
    }
    Ok(())
}

/// Apply the fields present in `payload` to an existing patient.
///
/// The register type is fixed at creation; consumption fields are ignored.
pub fn patch_patient(
    current: &PatientRecord,
    payload: &Payload,
    now: i64,
) -> Result<PatientRecord, ApplyError> {
    let reader = PayloadReader::new(payload);
    if let Some(requested) = patient_type(&reader)? {
        if requested != current.patient_type() {
            return Err(ApplyError::Validation(format!(
                "type cannot change from {} to {requested}",
                current.patient_type()
            )));
        }
    }

    let mut next = current.clone();
    if reader.contains("name") {
        next.name = reader.required_text("name")?;
    }
    next.details = patch_details(current.details.clone(), &reader)?;
    next.updated_at = reader.optional_timestamp("updatedAt")?.unwrap_or(now);
    Ok(next)
}

fn patient_type(reader: &PayloadReader<'_>) -> Result<Option<PatientType>, ApplyError> {
    reader
        .optional_text("type")?
        .map(|text| {
            text.parse().map_err(|_| {
                ApplyError::Validation("type must be maternal or child".to_string())
            })
        })
        .transpose()
}

fn patch_details(
    details: PatientDetails,
    reader: &PayloadReader<'_>,
) -> Result<PatientDetails, ApplyError> {
    Ok(match details {
        PatientDetails::Maternal(maternal) => {
            PatientDetails::Maternal(patch_maternal(maternal, reader)?)
        }
        PatientDetails::Child(child) => PatientDetails::Child(patch_child(child, reader)?),
    })
}

/// Overwrite an optional text field when the payload mentions it
fn patch_text(
    slot: &mut Option<String>,
    reader: &PayloadReader<'_>,
    field: &str,
) -> Result<(), ApplyError> {
    if reader.contains(field) {
        *slot = reader.optional_text(field)?;
    }
    Ok(())
}

fn patch_maternal(
    mut details: MaternalDetails,
    reader: &PayloadReader<'_>,
) -> Result<MaternalDetails, ApplyError> {
    if reader.contains("age") {
        details.age = reader.optional_integer("age")?;
    }
    patch_text(&mut details.contact_number, reader, "contactNumber")?;
    patch_text(&mut details.ward_tole_no, reader, "wardToleNo")?;
    for field in ["husbandName", "spouseName"] {
        patch_text(&mut details.spouse_name, reader, field)?;
    }
    patch_text(
        &mut details.last_menstrual_period,
        reader,
        "lastMenstrualPeriod",
    )?;
    patch_text(&mut details.parity, reader, "parity")?;
    patch_text(&mut details.pregnancy_month, reader, "pregnancyMonth")?;
    patch_text(&mut details.weight, reader, "weight")?;
    patch_text(&mut details.blood_pressure, reader, "bloodPressure")?;
    if let Some(symptoms) = reader.string_set("symptoms")? {
        details.symptoms = symptoms;
    }
    Ok(details)
}

fn patch_child(
    mut details: ChildDetails,
    reader: &PayloadReader<'_>,
) -> Result<ChildDetails, ApplyError> {
    patch_text(&mut details.dob, reader, "dob")?;
    patch_text(&mut details.gender, reader, "gender")?;
    patch_text(&mut details.birth_weight, reader, "birthWeight")?;
    patch_text(&mut details.muac, reader, "muac")?;
    patch_text(
        &mut details.breastfeeding_status,
        reader,
        "breastfeedingStatus",
    )?;
    for field in ["vaccines", "vaccinesGiven"] {
        if let Some(vaccines) = reader.string_set(field)? {
            details.vaccines = vaccines;
        }
    }
    Ok(details)
}
