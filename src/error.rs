//! Error types surfaced to callers of the simulator.
//!
//! Plumbing code (database worker, roster loading, config) uses `anyhow`;
//! anything a caller is expected to match on goes through [`GlucoseError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GlucoseError {
    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error("Patient ID already exists: {0}")]
    PatientExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl GlucoseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GlucoseError::PatientNotFound(_))
    }
}

pub type GlucoseResult<T> = std::result::Result<T, GlucoseError>;
