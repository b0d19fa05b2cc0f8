use serde::Serialize;

use crate::AppState;

use super::{FlowStarted, StopOutcome};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResponse {
    pub success: bool,
    pub warning: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<FlowStarted>,
}

pub async fn start_data_flow(state: &AppState, patient_id: String) -> Result<FlowResponse, String> {
    let started = state
        .flows
        .start(&patient_id)
        .await
        .map_err(|e| e.to_string())?;

    Ok(FlowResponse {
        success: true,
        warning: false,
        message: format!("Started data flow for patient {patient_id}"),
        started: Some(started),
    })
}

pub async fn stop_data_flow(state: &AppState, patient_id: String) -> Result<FlowResponse, String> {
    let response = match state.flows.stop(&patient_id).await {
        StopOutcome::Stopped => FlowResponse {
            success: true,
            warning: false,
            message: format!("Stopped data flow for patient {patient_id}"),
            started: None,
        },
        StopOutcome::NotActive => FlowResponse {
            success: false,
            warning: true,
            message: format!("No active data flow found for patient {patient_id}"),
            started: None,
        },
    };
    Ok(response)
}
