//! Collaborator seams used by the simulator.
//!
//! The flow controller and glucose service only talk to storage and the
//! patient registry through these traits. `Database` implements them for
//! SQLite, `MemoryStore` for tests and `storage = "memory"`.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{Patient, PatientAttributes, Reading};

pub use memory::MemoryStore;

/// Append-only reading storage, queryable per patient.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist one reading and return it with its assigned identifier.
    async fn save(&self, reading: &Reading) -> Result<Reading>;

    /// Append a batch of `patient_id` readings, all or nothing.
    async fn save_all(&self, patient_id: &str, readings: &[Reading]) -> Result<Vec<Reading>>;

    /// Drop every stored reading of `patient_id` and insert `readings`, all or
    /// nothing.
    async fn replace_all(&self, patient_id: &str, readings: &[Reading]) -> Result<Vec<Reading>>;

    async fn delete_all(&self, patient_id: &str) -> Result<usize>;

    async fn latest(&self, patient_id: &str) -> Result<Option<Reading>>;

    /// Readings at or after `since` (all when `None`), oldest first.
    async fn query_range(
        &self,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>>;
}

/// Resolves a patient identifier to the attributes the model needs.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn lookup(&self, patient_id: &str) -> Result<Option<PatientAttributes>>;
}

/// Storage for user-added patients.
#[async_trait]
pub trait PatientRecords: Send + Sync {
    async fn insert_patient(&self, patient: &Patient) -> Result<()>;

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>>;

    async fn list_patient_ids(&self) -> Result<Vec<String>>;
}
