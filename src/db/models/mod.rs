pub mod patient;
pub mod reading;

pub use patient::{NewPatient, Patient, PatientAttributes, PatientSummary};
pub use reading::Reading;
