use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{Patient, Reading};

use super::{PatientRecords, ReadingStore};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    readings: HashMap<String, Vec<Reading>>,
    patients: HashMap<String, Patient>,
}

impl MemoryState {
    fn assign_id(&mut self, reading: &Reading) -> Reading {
        self.next_id += 1;
        reading.clone().with_id(self.next_id)
    }
}

/// In-process reading and patient storage. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn reading_count(&self, patient_id: &str) -> usize {
        self.lock()
            .readings
            .get(patient_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Insert keeping the per-patient list ordered by (timestamp, id).
fn insert_ordered(list: &mut Vec<Reading>, reading: Reading) {
    let position = list.partition_point(|existing| existing.timestamp <= reading.timestamp);
    list.insert(position, reading);
}

fn ensure_single_patient(patient_id: &str, readings: &[Reading], operation: &str) -> Result<()> {
    if let Some(foreign) = readings.iter().find(|r| r.patient_id != patient_id) {
        bail!(
            "reading for patient {} passed to {operation} for {patient_id}",
            foreign.patient_id
        );
    }
    Ok(())
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn save(&self, reading: &Reading) -> Result<Reading> {
        let mut state = self.lock();
        let stored = state.assign_id(reading);
        insert_ordered(
            state.readings.entry(stored.patient_id.clone()).or_default(),
            stored.clone(),
        );
        Ok(stored)
    }

    async fn save_all(&self, patient_id: &str, readings: &[Reading]) -> Result<Vec<Reading>> {
        ensure_single_patient(patient_id, readings, "save_all")?;

        let mut state = self.lock();
        let stored: Vec<Reading> = readings.iter().map(|r| state.assign_id(r)).collect();
        let list = state.readings.entry(patient_id.to_string()).or_default();
        for reading in &stored {
            insert_ordered(list, reading.clone());
        }
        Ok(stored)
    }

    async fn replace_all(&self, patient_id: &str, readings: &[Reading]) -> Result<Vec<Reading>> {
        ensure_single_patient(patient_id, readings, "replace_all")?;

        let mut state = self.lock();
        let mut stored: Vec<Reading> = readings.iter().map(|r| state.assign_id(r)).collect();
        stored.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        state.readings.insert(patient_id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn delete_all(&self, patient_id: &str) -> Result<usize> {
        Ok(self
            .lock()
            .readings
            .remove(patient_id)
            .map(|list| list.len())
            .unwrap_or(0))
    }

    async fn latest(&self, patient_id: &str) -> Result<Option<Reading>> {
        Ok(self
            .lock()
            .readings
            .get(patient_id)
            .and_then(|list| list.last().cloned()))
    }

    async fn query_range(
        &self,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>> {
        let state = self.lock();
        let Some(list) = state.readings.get(patient_id) else {
            return Ok(Vec::new());
        };

        Ok(list
            .iter()
            .filter(|r| since.map_or(true, |since| r.timestamp >= since))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PatientRecords for MemoryStore {
    async fn insert_patient(&self, patient: &Patient) -> Result<()> {
        let mut state = self.lock();
        if state.patients.contains_key(&patient.id) {
            bail!("patient {} already stored", patient.id);
        }
        state.patients.insert(patient.id.clone(), patient.clone());
        Ok(())
    }

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        Ok(self.lock().patients.get(patient_id).cloned())
    }

    async fn list_patient_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.lock().patients.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
