pub mod commands;
pub mod roster;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use rand::Rng;

use crate::db::models::{NewPatient, Patient, PatientAttributes, PatientSummary};
use crate::error::{GlucoseError, GlucoseResult};
use crate::store::{PatientDirectory, PatientRecords};

pub use roster::Roster;

/// Resolves patients from the predefined roster first, then from storage.
pub struct PatientRegistry {
    roster: Roster,
    records: Arc<dyn PatientRecords>,
}

impl PatientRegistry {
    pub fn new(roster: Roster, records: Arc<dyn PatientRecords>) -> Self {
        Self { roster, records }
    }

    pub fn patient_types(&self) -> Vec<String> {
        self.roster.types()
    }

    pub fn patients_by_type(&self, patient_type: &str) -> Vec<PatientSummary> {
        self.roster
            .of_type(patient_type)
            .iter()
            .map(|p| PatientSummary {
                id: p.id.clone(),
                patient_type: p.patient_type.clone(),
            })
            .collect()
    }

    /// Roster and stored ids, deduplicated and sorted.
    pub async fn all_patient_ids(&self) -> Result<Vec<String>> {
        let mut ids: BTreeSet<String> = self.records.list_patient_ids().await?.into_iter().collect();
        ids.extend(self.roster.ids().map(str::to_string));
        Ok(ids.into_iter().collect())
    }

    pub async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        if let Some(patient) = self.roster.get(patient_id) {
            return Ok(Some(patient.clone()));
        }
        self.records.get_patient(patient_id).await
    }

    pub async fn add_patient(&self, input: NewPatient) -> GlucoseResult<Patient> {
        let patient = validate_new_patient(input)?;

        if self.roster.get(&patient.id).is_some() {
            return Err(GlucoseError::PatientExists(patient.id));
        }
        if self.records.get_patient(&patient.id).await?.is_some() {
            return Err(GlucoseError::PatientExists(patient.id));
        }

        self.records.insert_patient(&patient).await?;
        info!("Added patient {}", patient.id);
        Ok(patient)
    }

    /// Create `P001..Pnnn` demo patients with random attributes, skipping ids
    /// that already exist. Returns the ids created.
    pub async fn seed_demo_patients<R: Rng + Send>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for n in 1..=count {
            let id = format!("P{n:03}");
            if self.get_patient(&id).await?.is_some() {
                warn!("Demo patient {id} already exists, skipping");
                continue;
            }

            let has_diabetes = rng.gen_bool(0.5);
            let patient = Patient {
                id: id.clone(),
                patient_type: "demo".into(),
                age: rng.gen_range(25..=75),
                weight: rng.gen_range(50..=100) as f64,
                height: rng.gen_range(150..=190) as f64,
                has_diabetes,
                diabetes_type: has_diabetes.then(|| rng.gen_range(1..=2)),
                created_at: Some(Utc::now()),
            };
            self.records.insert_patient(&patient).await?;
            created.push(id);
        }

        info!("Seeded {} demo patients", created.len());
        Ok(created)
    }
}

#[async_trait]
impl PatientDirectory for PatientRegistry {
    async fn lookup(&self, patient_id: &str) -> Result<Option<PatientAttributes>> {
        Ok(self
            .get_patient(patient_id)
            .await?
            .map(|patient| patient.attributes()))
    }
}

fn validate_new_patient(input: NewPatient) -> GlucoseResult<Patient> {
    fn required<T>(value: Option<T>, field: &str) -> GlucoseResult<T> {
        value.ok_or_else(|| GlucoseError::InvalidInput(format!("Missing required field: {field}")))
    }

    let id = required(input.id, "id")?.trim().to_string();
    if id.is_empty() {
        return Err(GlucoseError::InvalidInput("Patient ID cannot be empty".into()));
    }

    let patient_type = required(input.patient_type, "type")?;
    let age = required(input.age, "age")?;
    let weight = required(input.weight, "weight")?;
    let height = required(input.height, "height")?;
    let has_diabetes = required(input.has_diabetes, "has_diabetes")?;

    if !(weight > 0.0 && height > 0.0) {
        return Err(GlucoseError::InvalidInput(
            "weight and height must be positive".into(),
        ));
    }

    Ok(Patient {
        id,
        patient_type,
        age,
        weight,
        height,
        has_diabetes,
        diabetes_type: if has_diabetes { input.diabetes_type } else { None },
        created_at: Some(Utc::now()),
    })
}
