use crate::db::models::{NewPatient, Patient, PatientSummary};
use crate::AppState;

pub async fn get_patient(state: &AppState, patient_id: String) -> Result<Patient, String> {
    state
        .patients
        .get_patient(&patient_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Patient not found: {patient_id}"))
}

pub async fn get_patients(state: &AppState) -> Result<Vec<String>, String> {
    state
        .patients
        .all_patient_ids()
        .await
        .map_err(|e| e.to_string())
}

pub fn get_patient_types(state: &AppState) -> Vec<String> {
    state.patients.patient_types()
}

pub fn get_patients_by_type(state: &AppState, patient_type: String) -> Vec<PatientSummary> {
    state.patients.patients_by_type(&patient_type)
}

pub async fn add_patient(state: &AppState, input: NewPatient) -> Result<Patient, String> {
    state
        .patients
        .add_patient(input)
        .await
        .map_err(|e| e.to_string())
}
