//! Patient record model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::operation::UnknownVariant;

/// Which register a patient belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientType {
    Maternal,
    Child,
}

impl PatientType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Maternal => "maternal",
            Self::Child => "child",
        }
    }
}

impl fmt::Display for PatientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatientType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maternal" => Ok(Self::Maternal),
            "child" => Ok(Self::Child),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Antenatal register fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaternalDetails {
    pub age: Option<i64>,
    pub contact_number: Option<String>,
    pub ward_tole_no: Option<String>,
    #[serde(rename = "husbandName", alias = "spouseName")]
    pub spouse_name: Option<String>,
    pub last_menstrual_period: Option<String>,
    pub parity: Option<String>,
    pub pregnancy_month: Option<String>,
    pub weight: Option<String>,
    pub blood_pressure: Option<String>,
    #[serde(default)]
    pub symptoms: BTreeSet<String>,
}

/// Child health register fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildDetails {
    pub dob: Option<String>,
    pub gender: Option<String>,
    pub birth_weight: Option<String>,
    pub muac: Option<String>,
    pub breastfeeding_status: Option<String>,
    #[serde(default, alias = "vaccinesGiven")]
    pub vaccines: BTreeSet<String>,
}

/// Type-tagged register details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PatientDetails {
    Maternal(MaternalDetails),
    Child(ChildDetails),
}

impl PatientDetails {
    pub const fn patient_type(&self) -> PatientType {
        match self {
            Self::Maternal(_) => PatientType::Maternal,
            Self::Child(_) => PatientType::Child,
        }
    }

    /// Empty details for the given register
    pub fn empty(patient_type: PatientType) -> Self {
        match patient_type {
            PatientType::Maternal => Self::Maternal(MaternalDetails::default()),
            PatientType::Child => Self::Child(ChildDetails::default()),
        }
    }
}

/// A registered patient, visible only to the user who created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: i64,
    #[serde(rename = "userId")]
    pub owner_user_id: String,
    pub name: String,
    #[serde(flatten)]
    pub details: PatientDetails,
    /// Inventory item consumed when this record was created
    #[serde(rename = "medicineId")]
    pub consumed_inventory_id: Option<i64>,
    #[serde(rename = "quantity")]
    pub consumed_quantity: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl PatientRecord {
    pub const fn patient_type(&self) -> PatientType {
        self.details.patient_type()
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_user_id == user_id
    }
}

/// Stock to take from one inventory item while creating a patient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    pub inventory_id: i64,
    pub quantity: i64,
}

/// Validated fields for a patient row that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPatientRecord {
    pub name: String,
    pub details: PatientDetails,
    pub consumption: Option<Consumption>,
    /// Recorded even without a consumption; defaults to 1
    pub quantity: i64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn patient_serializes_flat_with_type_tag() {
        let record = PatientRecord {
            id: 7,
            owner_user_id: "user-1".to_string(),
            name: "Sita".to_string(),
            details: PatientDetails::Child(ChildDetails {
                gender: Some("female".to_string()),
                vaccines: ["BCG".to_string()].into_iter().collect(),
                ..ChildDetails::default()
            }),
            consumed_inventory_id: None,
            consumed_quantity: 1,
            created_at: 1,
            updated_at: 1,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "child");
        assert_eq!(value["gender"], "female");
        assert_eq!(value["vaccines"], json!(["BCG"]));
        assert_eq!(value["userId"], "user-1");

        let back: PatientRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn maternal_details_accept_spouse_alias() {
        let details: PatientDetails =
            serde_json::from_value(json!({"type": "maternal", "spouseName": "Ram"})).unwrap();
        let PatientDetails::Maternal(maternal) = details else {
            panic!("expected maternal details");
        };
        assert_eq!(maternal.spouse_name.as_deref(), Some("Ram"));
    }

    #[test]
    fn patient_type_rejects_unknown() {
        assert!("elderly".parse::<PatientType>().is_err());
        assert_eq!("child".parse::<PatientType>().unwrap(), PatientType::Child);
    }
}
