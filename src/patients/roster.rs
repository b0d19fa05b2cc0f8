//! Predefined patient roster loaded from CSV.
//!
//! Expected header: `Name,type,age,weight,height,has_diabetes` (extra columns
//! are ignored, quoted fields are allowed).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;
use serde::Deserialize;

use crate::db::models::Patient;

const REQUIRED_COLUMNS: [&str; 6] = ["Name", "type", "age", "weight", "height", "has_diabetes"];

/// One data row of the roster file.
#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "type")]
    patient_type: String,
    age: f64,
    weight: f64,
    height: f64,
    has_diabetes: f64,
}

/// Patients grouped by type, in file order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    by_type: BTreeMap<String, Vec<Patient>>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = csv_reader()
            .from_path(path)
            .with_context(|| format!("failed to open patient CSV {}", path.display()))?;
        let roster = Self::from_reader(reader)
            .with_context(|| format!("invalid patient CSV {}", path.display()))?;

        for (patient_type, patients) in &roster.by_type {
            info!("Loaded {} {} type patients", patients.len(), patient_type);
        }
        info!(
            "Loaded {} patients from CSV {}",
            roster.len(),
            path.display()
        );
        Ok(roster)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Self::from_reader(csv_reader().from_reader(contents.as_bytes()))
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let header = reader.headers().context("failed to read CSV header")?.clone();
        if header.is_empty() {
            bail!("patient CSV is empty");
        }

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|column| !header.iter().any(|c| c == *column))
            .collect();
        if !missing.is_empty() {
            bail!(
                "patient CSV missing required columns: {}. Columns: {}",
                missing.join(", "),
                header.iter().collect::<Vec<_>>().join(", ")
            );
        }

        let mut roster = Self::default();
        for (index, result) in reader.deserialize().enumerate() {
            let row: RosterRow = result.with_context(|| format!("row {}", index + 1))?;
            let has_diabetes = row.has_diabetes as i64 != 0;
            let patient = Patient {
                id: row.name,
                patient_type: row.patient_type,
                age: row.age as u32,
                weight: row.weight,
                height: row.height,
                has_diabetes,
                diabetes_type: has_diabetes.then(|| if index % 2 == 0 { 1 } else { 2 }),
                created_at: None,
            };

            roster
                .by_type
                .entry(patient.patient_type.clone())
                .or_default()
                .push(patient);
        }

        Ok(roster)
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn types(&self) -> Vec<String> {
        self.by_type.keys().cloned().collect()
    }

    pub fn of_type(&self, patient_type: &str) -> &[Patient] {
        self.by_type
            .get(patient_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, patient_id: &str) -> Option<&Patient> {
        self.by_type
            .values()
            .flatten()
            .find(|patient| patient.id == patient_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_type.values().flatten().map(|p| p.id.as_str())
    }
}

fn csv_reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All);
    builder
}
