use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

use crate::context::SimContext;
use crate::db::models::{PatientAttributes, Reading};
use crate::error::{GlucoseError, GlucoseResult};

use super::loop_worker::{flow_loop, publish};
use super::registry::{FlowRegistry, FlowState, FlowTicket};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStarted {
    pub patient_id: String,
    pub generation: u64,
    pub run_id: Uuid,
    /// A flow was already running and has been superseded.
    pub preempted: bool,
    /// The forced-reset reading, if it could be persisted.
    pub initial: Option<Reading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotActive,
}

/// Starts and stops per-patient live flows.
#[derive(Clone)]
pub struct FlowController {
    ctx: SimContext,
    registry: Arc<FlowRegistry>,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    tick_interval: Duration,
}

impl FlowController {
    pub fn new(ctx: SimContext, tick_interval: Duration) -> Self {
        Self {
            ctx,
            registry: Arc::new(FlowRegistry::new()),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            tick_interval,
        }
    }

    /// Start (or restart) the live flow for `patient_id`.
    ///
    /// Any flow already running for the patient is superseded first. A
    /// forced-reset reading is emitted before the first tick; failing to
    /// persist it is logged and does not abort the start.
    pub async fn start(&self, patient_id: &str) -> GlucoseResult<FlowStarted> {
        let attributes = self
            .ctx
            .patients
            .lookup(patient_id)
            .await?
            .ok_or_else(|| GlucoseError::PatientNotFound(patient_id.to_string()))?;

        let preempted = self.registry.is_active(patient_id);
        if preempted {
            info!("Data flow for patient {patient_id} already running, replacing it");
        }

        let ticket = self.registry.begin_generation(patient_id);
        let initial = self.emit_reset_reading(&ticket, &attributes).await;

        let handle = tokio::spawn(flow_loop(
            self.ctx.clone(),
            Arc::clone(&self.registry),
            ticket.clone(),
            attributes,
            self.tick_interval,
        ));
        // a handle of a retired generation is dropped; its loop exits on its own
        {
            let mut tasks = self.tasks.lock().await;
            if self.registry.is_current(patient_id, ticket.generation) {
                tasks.insert(patient_id.to_string(), handle);
            }
        }

        info!(
            "Started data flow for patient {patient_id} (generation {}, every {:?})",
            ticket.generation, self.tick_interval
        );

        Ok(FlowStarted {
            patient_id: patient_id.to_string(),
            generation: ticket.generation,
            run_id: ticket.run_id,
            preempted,
            initial,
        })
    }

    async fn emit_reset_reading(
        &self,
        ticket: &FlowTicket,
        attributes: &PatientAttributes,
    ) -> Option<Reading> {
        if !self.registry.is_current(&ticket.patient_id, ticket.generation) {
            return None;
        }

        let value = self.ctx.rng.with(|rng| {
            let seed = self.ctx.model.reset_value(rng);
            self.ctx.model.live_step(seed, attributes.has_diabetes, rng)
        });
        let reading = Reading::new(&attributes.id, value, self.ctx.clock.now());
        match self.ctx.store.save(&reading).await {
            Ok(stored) => {
                publish(&self.ctx, &stored);
                Some(stored)
            }
            Err(err) => {
                warn!(
                    "failed to persist reset reading for {}: {err:?}",
                    attributes.id
                );
                None
            }
        }
    }

    /// Stop the live flow for `patient_id`. Idempotent.
    ///
    /// A tick already in flight may still complete; nothing is written after
    /// it.
    pub async fn stop(&self, patient_id: &str) -> StopOutcome {
        if self.registry.deactivate(patient_id) {
            info!("Stopped data flow for patient {patient_id}");
            StopOutcome::Stopped
        } else {
            warn!("No active data flow found for patient {patient_id}");
            StopOutcome::NotActive
        }
    }

    pub fn is_active(&self, patient_id: &str) -> bool {
        self.registry.is_active(patient_id)
    }

    pub fn state(&self, patient_id: &str) -> Option<FlowState> {
        self.registry.state(patient_id)
    }

    pub fn active_patients(&self) -> Vec<String> {
        self.registry.active_patients()
    }

    /// Stop every flow and wait for the loops to finish.
    pub async fn shutdown(&self) {
        for patient_id in self.registry.active_patients() {
            self.registry.deactivate(&patient_id);
        }

        let handles: Vec<(String, JoinHandle<()>)> = self.tasks.lock().await.drain().collect();
        for (patient_id, handle) in handles {
            if let Err(err) = handle.await {
                warn!("flow task for {patient_id} failed to join: {err}");
            }
        }
        info!("All data flows stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RuntimeClock;
    use crate::feed::FeedHub;
    use crate::patients::{PatientRegistry, Roster};
    use crate::simulation::{GlucoseModel, SharedRng};
    use crate::store::{MemoryStore, ReadingStore};

    fn controller() -> (FlowController, Arc<MemoryStore>, Arc<FeedHub>) {
        controller_with_seed(7)
    }

    fn controller_with_seed(seed: u64) -> (FlowController, Arc<MemoryStore>, Arc<FeedHub>) {
        let store = Arc::new(MemoryStore::new());
        let roster = Roster::parse(
            "Name,type,age,weight,height,has_diabetes\nAdult#001,adult,45,80,175,1\nChild#001,child,9,30,130,0\n",
        )
        .unwrap();
        let feed = Arc::new(FeedHub::new(64));
        let ctx = SimContext {
            store: store.clone(),
            patients: Arc::new(PatientRegistry::new(roster, store.clone())),
            feed: feed.clone(),
            clock: Arc::new(RuntimeClock::new()),
            model: Arc::new(GlucoseModel::default()),
            rng: SharedRng::new(Some(seed)),
        };
        (
            FlowController::new(ctx, DEFAULT_TICK_INTERVAL),
            store,
            feed,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_emits_reset_reading_one_step_from_neutral() {
        let (flows, store, _) = controller();
        let started = flows.start("Adult#001").await.unwrap();

        // 85..=115 plus one diabetic step of at most 10
        let initial = started.initial.unwrap();
        assert!((75.0..=125.0).contains(&initial.glucose));
        assert_eq!(store.reading_count("Adult#001"), 1);
        assert!(!started.preempted);
        assert!(flows.is_active("Adult#001"));

        let started = flows.start("Child#001").await.unwrap();
        assert!((82.0..=118.0).contains(&started.initial.unwrap().glucose));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_readings_are_stepped_across_seeds() {
        // a bare reset draw is always whole; a stepped one almost never is
        let mut fractional = 0;
        for seed in 0..50 {
            let (flows, _, _) = controller_with_seed(seed);
            let glucose = flows.start("Adult#001").await.unwrap().initial.unwrap().glucose;
            assert!((75.0..=125.0).contains(&glucose));
            if glucose.fract() != 0.0 {
                fractional += 1;
            }
        }
        assert!(fractional > 25);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_keep_the_current_generation_handle() {
        let (flows, store, _) = controller();
        let (a, b) = tokio::join!(flows.start("Child#001"), flows.start("Child#001"));
        let latest = a.unwrap().generation.max(b.unwrap().generation);
        assert_eq!(flows.state("Child#001").unwrap().generation, latest);
        assert_eq!(flows.tasks.lock().await.len(), 1);

        flows.shutdown().await;
        assert!(flows.tasks.lock().await.is_empty());
        let count = store.reading_count("Child#001");
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.reading_count("Child#001"), count);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_interval() {
        let (flows, store, _) = controller();
        flows.start("Child#001").await.unwrap();

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(store.reading_count("Child#001"), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.reading_count("Child#001"), 3);

        let readings = store.query_range("Child#001", None, None).await.unwrap();
        for pair in readings.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp + chrono::Duration::seconds(5));
            // non-diabetic walk moves at most 3 + 3 per tick
            assert!((pair[1].glucose - pair[0].glucose).abs() <= 6.0 + 0.1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_writes_and_is_idempotent() {
        let (flows, store, _) = controller();
        flows.start("Adult#001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        assert_eq!(flows.stop("Adult#001").await, StopOutcome::Stopped);
        let count = store.reading_count("Adult#001");
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.reading_count("Adult#001"), count);

        assert_eq!(flows.stop("Adult#001").await, StopOutcome::NotActive);
        assert_eq!(flows.stop("never-started").await, StopOutcome::NotActive);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_running_flow() {
        let (flows, store, _) = controller();
        flows.start("Adult#001").await.unwrap();
        let second = flows.start("Adult#001").await.unwrap();
        assert!(second.preempted);
        assert_eq!(second.generation, 2);

        // two reset readings, then a single stream: one reading per tick
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(store.reading_count("Adult#001"), 3);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.reading_count("Adult#001"), 4);
        assert_eq!(flows.active_patients(), vec!["Adult#001"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_patient_is_not_found() {
        let (flows, store, _) = controller();
        let err = flows.start("nobody").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!flows.is_active("nobody"));
        assert_eq!(store.reading_count("nobody"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_published_to_subscribers() {
        let (flows, _, feed) = controller();
        let mut rx = feed.subscribe("Child#001");
        flows.start("Child#001").await.unwrap();

        let reset = rx.recv().await.unwrap();
        assert_eq!(reset.data.len(), 1);
        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.patient_id, "Child#001");
        assert!(tick.data[0].timestamp > reset.data[0].timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let (flows, store, _) = controller();
        flows.start("Adult#001").await.unwrap();
        flows.start("Child#001").await.unwrap();
        flows.shutdown().await;

        assert!(flows.active_patients().is_empty());
        let before = store.reading_count("Adult#001") + store.reading_count("Child#001");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            store.reading_count("Adult#001") + store.reading_count("Child#001"),
            before
        );
    }
}
