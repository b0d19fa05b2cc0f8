//! Glucose reading data model.
//!
//! The only durable unit produced by the simulator. Values are clamped to the
//! physiological range and rounded to one decimal on construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::simulation::clamp_glucose;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: Option<i64>,
    pub patient_id: String,
    pub glucose: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(patient_id: impl Into<String>, glucose: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            patient_id: patient_id.into(),
            glucose: (clamp_glucose(glucose) * 10.0).round() / 10.0,
            timestamp,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}
