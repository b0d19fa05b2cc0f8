use crate::db::models::Reading;
use crate::AppState;

use super::{BackfillSummary, IngestPoint, DEFAULT_QUERY_HOURS};

pub async fn initialize_patient_data(
    state: &AppState,
    patient_id: String,
) -> Result<BackfillSummary, String> {
    state
        .glucose
        .initialize_patient_data(&patient_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_glucose(
    state: &AppState,
    patient_id: String,
    hours: Option<f64>,
    limit: Option<usize>,
) -> Result<Vec<Reading>, String> {
    state
        .glucose
        .readings(&patient_id, hours.unwrap_or(DEFAULT_QUERY_HOURS), limit)
        .await
        .map_err(|e| e.to_string())
}

pub async fn mock_update(
    state: &AppState,
    patient_id: String,
    data: Vec<IngestPoint>,
) -> Result<Vec<Reading>, String> {
    state
        .glucose
        .ingest(&patient_id, &data)
        .await
        .map_err(|e| e.to_string())
}
