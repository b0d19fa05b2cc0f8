use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use glucoflow::clock::RuntimeClock;
use glucoflow::db::models::{NewPatient, Reading};
use glucoflow::flow::commands::{start_data_flow, stop_data_flow};
use glucoflow::flow::StopOutcome;
use glucoflow::patients::Roster;
use glucoflow::settings::AppConfig;
use glucoflow::store::{MemoryStore, ReadingStore};
use glucoflow::AppState;

const ROSTER: &str = "Name,type,age,weight,height,has_diabetes\n\
Adult#001,adult,45,80,175,1\n\
Child#001,child,9,30,130,0\n";

fn config() -> AppConfig {
    AppConfig {
        seed: Some(11),
        ..AppConfig::default()
    }
}

fn app_with(store: Arc<dyn ReadingStore>, records: Arc<MemoryStore>) -> AppState {
    AppState::assemble(
        config(),
        Roster::parse(ROSTER).unwrap(),
        store,
        records,
        Arc::new(RuntimeClock::new()),
    )
}

fn app() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (app_with(store.clone(), store.clone()), store)
}

/// Memory store whose writes can be switched off.
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

#[async_trait]
impl ReadingStore for FlakyStore {
    async fn save(&self, reading: &Reading) -> Result<Reading> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("disk unavailable");
        }
        self.inner.save(reading).await
    }

    async fn save_all(&self, patient_id: &str, readings: &[Reading]) -> Result<Vec<Reading>> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("disk unavailable");
        }
        self.inner.save_all(patient_id, readings).await
    }

    async fn replace_all(&self, patient_id: &str, readings: &[Reading]) -> Result<Vec<Reading>> {
        self.inner.replace_all(patient_id, readings).await
    }

    async fn delete_all(&self, patient_id: &str) -> Result<usize> {
        self.inner.delete_all(patient_id).await
    }

    async fn latest(&self, patient_id: &str) -> Result<Option<Reading>> {
        self.inner.latest(patient_id).await
    }

    async fn query_range(
        &self,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>> {
        self.inner.query_range(patient_id, since, limit).await
    }
}

#[tokio::test(start_paused = true)]
async fn diabetic_flow_produces_readings_until_stopped() {
    let (state, store) = app();
    let mut feed = state.feed.subscribe("Adult#001");

    let response = start_data_flow(&state, "Adult#001".into()).await.unwrap();
    assert!(response.success);

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    let readings = store.query_range("Adult#001", None, None).await.unwrap();
    assert_eq!(readings.len(), 2);
    assert!(readings[1].timestamp >= readings[0].timestamp + chrono::Duration::seconds(5));
    for reading in &readings {
        assert!((40.0..=300.0).contains(&reading.glucose));
    }

    // reset reading and first tick were both broadcast
    assert_eq!(feed.recv().await.unwrap().data[0], readings[0]);
    assert_eq!(feed.recv().await.unwrap().data[0], readings[1]);

    let response = stop_data_flow(&state, "Adult#001".into()).await.unwrap();
    assert!(response.success);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(store.reading_count("Adult#001"), 2);
}

#[tokio::test(start_paused = true)]
async fn stopping_twice_warns_the_second_time() {
    let (state, _) = app();
    start_data_flow(&state, "Child#001".into()).await.unwrap();

    assert_eq!(state.flows.stop("Child#001").await, StopOutcome::Stopped);
    let response = stop_data_flow(&state, "Child#001".into()).await.unwrap();
    assert!(!response.success);
    assert!(response.warning);
    assert!(response.message.contains("No active data flow"));
}

#[tokio::test(start_paused = true)]
async fn double_start_keeps_a_single_stream() {
    let (state, store) = app();
    let (a, b) = tokio::join!(
        state.flows.start("Child#001"),
        state.flows.start("Child#001")
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.generation, b.generation);
    assert!(state.flows.is_active("Child#001"));

    // one reset reading per start that was still current when it ran
    let resets = store.reading_count("Child#001");
    assert!((1..=2).contains(&resets));

    tokio::time::sleep(Duration::from_millis(15_500)).await;
    assert_eq!(store.reading_count("Child#001"), resets + 3);

    let readings = store.query_range("Child#001", None, None).await.unwrap();
    for pair in readings[resets..].windows(2) {
        assert!(pair[1].timestamp >= pair[0].timestamp + chrono::Duration::seconds(5));
    }
}

#[tokio::test(start_paused = true)]
async fn starting_unknown_patient_fails_without_side_effects() {
    let (state, store) = app();
    let err = start_data_flow(&state, "Ghost#404".into()).await.unwrap_err();
    assert!(err.contains("Patient not found"));
    assert!(!state.flows.is_active("Ghost#404"));
    assert_eq!(store.reading_count("Ghost#404"), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_ticks_do_not_end_the_flow() {
    let records = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        failing: AtomicBool::new(false),
    });
    let state = app_with(flaky.clone(), records);

    state.flows.start("Adult#001").await.unwrap();
    flaky.failing.store(true, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(flaky.inner.reading_count("Adult#001"), 1);
    assert!(state.flows.is_active("Adult#001"));

    flaky.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(flaky.inner.reading_count("Adult#001"), 2);
}

#[tokio::test(start_paused = true)]
async fn reset_failure_does_not_abort_start() {
    let records = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        failing: AtomicBool::new(true),
    });
    let state = app_with(flaky.clone(), records);

    let started = state.flows.start("Child#001").await.unwrap();
    assert!(started.initial.is_none());
    assert!(state.flows.is_active("Child#001"));

    flaky.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert_eq!(flaky.inner.reading_count("Child#001"), 1);
}

#[tokio::test(start_paused = true)]
async fn flows_of_different_patients_are_independent() {
    let (state, store) = app();
    state.flows.start("Adult#001").await.unwrap();
    state.flows.start("Child#001").await.unwrap();

    state.flows.stop("Adult#001").await;
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    assert_eq!(store.reading_count("Adult#001"), 1);
    assert_eq!(store.reading_count("Child#001"), 3);
    assert_eq!(state.flows.active_patients(), vec!["Child#001"]);
}

#[tokio::test(start_paused = true)]
async fn added_patient_streams_like_a_roster_patient() {
    let (state, store) = app();
    state
        .patients
        .add_patient(NewPatient {
            id: Some("P001".into()),
            patient_type: Some("custom".into()),
            age: Some(52),
            weight: Some(88.0),
            height: Some(178.0),
            has_diabetes: Some(true),
            diabetes_type: Some(2),
        })
        .await
        .unwrap();

    state.flows.start("P001").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    let readings = store.query_range("P001", None, None).await.unwrap();
    assert_eq!(readings.len(), 2);
    assert!(readings.iter().all(|r| (40.0..=300.0).contains(&r.glucose)));
    assert!(readings[1].timestamp >= readings[0].timestamp + chrono::Duration::seconds(5));
    // diabetic walk moves at most 10 + 3 per tick
    assert!((readings[1].glucose - readings[0].glucose).abs() <= 13.0 + 0.1);

    state.flows.stop("P001").await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(store.reading_count("P001"), 2);
}
