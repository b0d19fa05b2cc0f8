//! Glucose history: backfill, queries and externally supplied readings.

pub mod commands;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::context::SimContext;
use crate::db::models::Reading;
use crate::error::{GlucoseError, GlucoseResult};
use crate::feed::{FeedHub, GlucoseUpdate};
use crate::simulation::BackfillGenerator;

pub const DEFAULT_QUERY_HOURS: f64 = 3.0;
pub const DEFAULT_QUERY_LIMIT: usize = 100;
const FULL_HISTORY_HOURS: f64 = 24.0;
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillSummary {
    pub patient_id: String,
    pub data_points: usize,
    /// Roster patients carry a `#` in their id.
    pub is_predefined: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// One externally supplied reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestPoint {
    pub glucose: Option<f64>,
    pub timestamp: Option<String>,
}

pub struct Subscription {
    pub receiver: broadcast::Receiver<GlucoseUpdate>,
    /// Most recent stored reading at subscribe time.
    pub current: Option<Reading>,
}

pub struct GlucoseService {
    ctx: SimContext,
    generator: BackfillGenerator,
}

impl GlucoseService {
    pub fn new(ctx: SimContext) -> Self {
        let generator = BackfillGenerator::new((*ctx.model).clone());
        Self { ctx, generator }
    }

    /// Replace the patient's history with a fresh 24h backfill ending now.
    pub async fn initialize_patient_data(&self, patient_id: &str) -> GlucoseResult<BackfillSummary> {
        let attributes = self
            .ctx
            .patients
            .lookup(patient_id)
            .await?
            .ok_or_else(|| GlucoseError::PatientNotFound(patient_id.to_string()))?;

        let window_end = self.ctx.clock.now();
        let backfill = self
            .ctx
            .rng
            .with(|rng| self.generator.generate(&attributes, window_end, rng));

        let stored = self
            .ctx
            .store
            .replace_all(patient_id, &backfill.readings)
            .await?;

        let summary = BackfillSummary {
            patient_id: patient_id.to_string(),
            data_points: stored.len(),
            is_predefined: patient_id.contains('#'),
            window_start: backfill.window_start,
            window_end: backfill.window_end,
        };
        info!(
            "Initialized {} readings for patient {} ({} to {})",
            summary.data_points, patient_id, summary.window_start, summary.window_end
        );

        self.publish(GlucoseUpdate {
            patient_id: patient_id.to_string(),
            data: stored,
        });
        Ok(summary)
    }

    /// Stored readings, oldest first.
    ///
    /// `hours >= 24` returns the whole history. Shorter windows are anchored
    /// at the current time and capped at `limit` (default 100) readings.
    pub async fn readings(
        &self,
        patient_id: &str,
        hours: f64,
        limit: Option<usize>,
    ) -> GlucoseResult<Vec<Reading>> {
        if !(hours > 0.0) {
            return Err(GlucoseError::InvalidInput(format!(
                "hours must be positive, got {hours}"
            )));
        }

        let readings = if hours >= FULL_HISTORY_HOURS {
            self.ctx.store.query_range(patient_id, None, limit).await?
        } else {
            let window = Duration::milliseconds((hours * 3_600_000.0) as i64);
            let since = self.ctx.clock.now() - window;
            self.ctx
                .store
                .query_range(
                    patient_id,
                    Some(since),
                    Some(limit.unwrap_or(DEFAULT_QUERY_LIMIT)),
                )
                .await?
        };
        Ok(readings)
    }

    pub async fn latest(&self, patient_id: &str) -> GlucoseResult<Option<Reading>> {
        Ok(self.ctx.store.latest(patient_id).await?)
    }

    /// Persist and broadcast externally supplied readings.
    ///
    /// The whole batch is validated before anything is written and stored in
    /// one write; a storage failure leaves nothing behind.
    pub async fn ingest(
        &self,
        patient_id: &str,
        points: &[IngestPoint],
    ) -> GlucoseResult<Vec<Reading>> {
        if points.is_empty() {
            return Err(GlucoseError::InvalidInput("no data points supplied".into()));
        }
        if self.ctx.patients.lookup(patient_id).await?.is_none() {
            return Err(GlucoseError::PatientNotFound(patient_id.to_string()));
        }

        let now = self.ctx.clock.now();
        let readings = points
            .iter()
            .enumerate()
            .map(|(index, point)| {
                let glucose = point.glucose.ok_or_else(|| {
                    GlucoseError::InvalidInput(format!("data point {index} is missing glucose"))
                })?;
                if !glucose.is_finite() {
                    return Err(GlucoseError::InvalidInput(format!(
                        "data point {index} has a non-finite glucose value"
                    )));
                }
                let timestamp = match point.timestamp.as_deref() {
                    Some(raw) => parse_ingest_timestamp(raw)?,
                    None => now,
                };
                Ok(Reading::new(patient_id, glucose, timestamp))
            })
            .collect::<GlucoseResult<Vec<_>>>()?;

        let stored = self.ctx.store.save_all(patient_id, &readings).await?;
        info!("Ingested {} readings for patient {patient_id}", stored.len());

        self.publish(GlucoseUpdate {
            patient_id: patient_id.to_string(),
            data: stored.clone(),
        });
        Ok(stored)
    }

    fn publish(&self, event: GlucoseUpdate) {
        let patient_id = event.patient_id.clone();
        if let Err(err) = self.ctx.feed.publish(event) {
            warn!("failed to publish glucose update for {patient_id}: {err:?}");
        }
    }

    pub async fn subscribe(&self, feed: &FeedHub, patient_id: &str) -> GlucoseResult<Subscription> {
        let receiver = feed.subscribe(patient_id);
        let current = self.latest(patient_id).await?;
        Ok(Subscription { receiver, current })
    }
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS` (optionally with `T` and fractional
/// seconds) read as local time.
pub fn parse_ingest_timestamp(raw: &str) -> GlucoseResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let normalized = raw.replacen('T', " ", 1);
    let without_fraction = normalized.split('.').next().unwrap_or(&normalized);
    let naive = NaiveDateTime::parse_from_str(without_fraction, NAIVE_TIMESTAMP_FORMAT)
        .map_err(|_| GlucoseError::InvalidInput(format!("unrecognised timestamp: {raw}")))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| GlucoseError::InvalidInput(format!("timestamp does not exist locally: {raw}")))
}
