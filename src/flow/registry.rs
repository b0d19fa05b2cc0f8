use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub active: bool,
    pub generation: u64,
}

/// Proof of ownership of one flow generation. A task holding a ticket may only
/// do work while `FlowRegistry::is_current` accepts it.
#[derive(Debug, Clone)]
pub struct FlowTicket {
    pub patient_id: String,
    pub generation: u64,
    pub run_id: Uuid,
    cancel: CancellationToken,
}

impl FlowTicket {
    /// Resolves once the generation is stopped or superseded. Best-effort
    /// wake-up only; liveness is decided by the registry.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

#[derive(Debug)]
struct FlowEntry {
    state: FlowState,
    cancel: Option<CancellationToken>,
}

/// Patient -> flow lifecycle table. Entries are never removed.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    entries: Mutex<HashMap<String, FlowEntry>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, FlowEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start a new generation for `patient_id`, superseding (and cancelling)
    /// whatever ran before.
    pub fn begin_generation(&self, patient_id: &str) -> FlowTicket {
        let cancel = CancellationToken::new();
        let mut entries = self.entries();
        let entry = entries
            .entry(patient_id.to_string())
            .or_insert_with(|| FlowEntry {
                state: FlowState {
                    active: false,
                    generation: 0,
                },
                cancel: None,
            });

        if let Some(previous) = entry.cancel.replace(cancel.clone()) {
            previous.cancel();
        }
        entry.state = FlowState {
            active: true,
            generation: entry.state.generation + 1,
        };

        FlowTicket {
            patient_id: patient_id.to_string(),
            generation: entry.state.generation,
            run_id: Uuid::new_v4(),
            cancel,
        }
    }

    pub fn is_current(&self, patient_id: &str, generation: u64) -> bool {
        self.entries()
            .get(patient_id)
            .map_or(false, |entry| entry.state.active && entry.state.generation == generation)
    }

    /// Mark the flow inactive. Returns false when nothing was active.
    pub fn deactivate(&self, patient_id: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(patient_id) else {
            return false;
        };
        if !entry.state.active {
            return false;
        }

        entry.state.active = false;
        if let Some(token) = entry.cancel.take() {
            token.cancel();
        }
        true
    }

    pub fn is_active(&self, patient_id: &str) -> bool {
        self.entries()
            .get(patient_id)
            .map_or(false, |entry| entry.state.active)
    }

    pub fn state(&self, patient_id: &str) -> Option<FlowState> {
        self.entries().get(patient_id).map(|entry| entry.state)
    }

    pub fn active_patients(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.state.active)
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }
}
