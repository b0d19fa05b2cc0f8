use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use crate::context::SimContext;
use crate::db::models::{PatientAttributes, Reading};
use crate::feed::GlucoseUpdate;

use super::registry::{FlowRegistry, FlowTicket};

/// Periodic producer for one flow generation.
///
/// The first reading lands one `period` after spawn. Every tick re-checks the
/// registry, so a stopped or superseded generation never writes again even
/// if the cancellation wake-up is missed.
pub(crate) async fn flow_loop(
    ctx: SimContext,
    registry: Arc<FlowRegistry>,
    ticket: FlowTicket,
    attributes: PatientAttributes,
    period: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        "flow loop started for {} (generation {}, run {})",
        ticket.patient_id, ticket.generation, ticket.run_id
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !registry.is_current(&ticket.patient_id, ticket.generation) {
                    debug!(
                        "flow generation {} for {} retired",
                        ticket.generation, ticket.patient_id
                    );
                    break;
                }

                match perform_tick(&ctx, &attributes).await {
                    Ok(reading) => debug!(
                        "tick {} -> {:.1} mg/dL at {}",
                        reading.patient_id, reading.glucose, reading.timestamp
                    ),
                    Err(err) => error!("flow tick failed for patient {}: {err:?}", ticket.patient_id),
                }
            }
            _ = ticket.cancelled() => {
                info!(
                    "flow loop for {} shutting down (generation {})",
                    ticket.patient_id, ticket.generation
                );
                break;
            }
        }
    }
}

/// One live step: read the latest value, walk it, persist, publish.
pub(crate) async fn perform_tick(
    ctx: &SimContext,
    attributes: &PatientAttributes,
) -> Result<Reading> {
    let previous = ctx
        .store
        .latest(&attributes.id)
        .await
        .context("failed to load latest reading")?;

    let value = ctx.rng.with(|rng| {
        let seed = match &previous {
            Some(reading) => reading.glucose,
            None => ctx.model.initial_value(attributes.has_diabetes, rng),
        };
        ctx.model.live_step(seed, attributes.has_diabetes, rng)
    });

    let reading = Reading::new(&attributes.id, value, ctx.clock.now());
    let stored = ctx
        .store
        .save(&reading)
        .await
        .context("failed to persist live reading")?;

    publish(ctx, &stored);
    Ok(stored)
}

/// Publish failures are logged; the reading is already persisted.
pub(crate) fn publish(ctx: &SimContext, reading: &Reading) {
    if let Err(err) = ctx.feed.publish(GlucoseUpdate::single(reading.clone())) {
        warn!("failed to publish reading for {}: {err:?}", reading.patient_id);
    }
}
