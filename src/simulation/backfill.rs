use chrono::{DateTime, Duration, Local, Utc};
use log::{debug, info};
use rand::Rng;

use crate::db::models::{PatientAttributes, Reading};

use super::model::{hour_of_day, GlucoseModel, SimulationState};

pub const BACKFILL_POINTS: usize = 288;
pub const BACKFILL_INTERVAL_MINUTES: i64 = 5;
pub const BACKFILL_WINDOW_HOURS: i64 = 24;

/// A generated history, oldest first, plus the profile it was drawn from.
#[derive(Debug, Clone)]
pub struct Backfill {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub profile: SimulationState,
    pub readings: Vec<Reading>,
}

/// Produces a dense 24h history for one patient in a single pass.
///
/// Pure computation: nothing is persisted here. Callers are expected to
/// replace whatever history the patient already has.
#[derive(Debug, Clone, Default)]
pub struct BackfillGenerator {
    model: GlucoseModel,
}

impl BackfillGenerator {
    pub fn new(model: GlucoseModel) -> Self {
        Self { model }
    }

    pub fn generate<R: Rng + ?Sized>(
        &self,
        attributes: &PatientAttributes,
        window_end: DateTime<Utc>,
        rng: &mut R,
    ) -> Backfill {
        let window_start = window_end - Duration::hours(BACKFILL_WINDOW_HOURS);
        let step = Duration::minutes(BACKFILL_INTERVAL_MINUTES);

        let mut state = self.model.draw_state(attributes.has_diabetes, rng);
        let profile = state.clone();
        let mut readings = Vec::with_capacity(BACKFILL_POINTS);

        // Points must be produced in chronological order; each one feeds the next.
        for i in 0..BACKFILL_POINTS {
            let timestamp = window_start + step * i as i32;
            let hour = hour_of_day(&timestamp.with_timezone(&Local));
            let value = self
                .model
                .backfill_step(&state, attributes.has_diabetes, hour, rng);
            state.previous_value = value;
            readings.push(Reading::new(&attributes.id, value, timestamp));
        }

        if let (Some(first), Some(last)) = (readings.first(), readings.last()) {
            debug!(
                "Backfill for {} spans {} -> {} ({} points)",
                attributes.id,
                first.timestamp,
                last.timestamp,
                readings.len()
            );
        }
        info!(
            "Generated {} backfill points for patient {} (baseline {:.0}, variability {:.1})",
            readings.len(),
            attributes.id,
            profile.baseline,
            profile.variability
        );

        Backfill {
            window_start,
            window_end,
            profile,
            readings,
        }
    }
}
