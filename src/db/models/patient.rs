//! Patient data models.
//!
//! - `Patient`: full record, either from the predefined roster or user-added
//! - `PatientAttributes`: the subset the simulator needs to pick parameters
//! - `NewPatient`: validated input for `add_patient`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    #[serde(rename = "type")]
    pub patient_type: String,
    pub age: u32,
    pub weight: f64,
    pub height: f64,
    pub has_diabetes: bool,
    pub diabetes_type: Option<u8>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Patient {
    pub fn attributes(&self) -> PatientAttributes {
        PatientAttributes {
            id: self.id.clone(),
            has_diabetes: self.has_diabetes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientAttributes {
    pub id: String,
    pub has_diabetes: bool,
}

/// Request body for adding a patient. Every field is optional so that missing
/// ones can be reported by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub patient_type: Option<String>,
    pub age: Option<u32>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub has_diabetes: Option<bool>,
    pub diabetes_type: Option<u8>,
}

/// Lightweight listing entry for `patients_by_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub patient_type: String,
}
