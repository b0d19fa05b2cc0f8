//! Command-line front end over the command functions.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::db::models::NewPatient;
use crate::feed::GlucoseUpdate;
use crate::flow::commands::start_data_flow;
use crate::glucose::commands::{get_glucose, initialize_patient_data};
use crate::patients::commands::{
    add_patient, get_patient, get_patient_types, get_patients, get_patients_by_type,
};
use crate::AppState;

/// Synthetic blood-glucose simulator
#[derive(Parser)]
#[command(name = "glucoflow")]
#[command(about = "Synthetic blood-glucose histories and live per-patient feeds", long_about = None)]
pub struct Cli {
    /// JSON config file
    #[arg(long, env = "GLUCOFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Delete and recreate the database before running the command
    #[arg(long)]
    pub reset_db: bool,

    /// Use in-memory storage
    #[arg(long)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List every known patient id
    Patients {
        /// Only roster patients of this type
        #[arg(long = "type")]
        patient_type: Option<String>,
    },
    /// Show one patient
    Patient { id: String },
    /// Add a patient to storage
    AddPatient {
        id: String,
        #[arg(long = "type", default_value = "custom")]
        patient_type: String,
        #[arg(long)]
        age: u32,
        #[arg(long)]
        weight: f64,
        #[arg(long)]
        height: f64,
        #[arg(long)]
        diabetic: bool,
        #[arg(long)]
        diabetes_type: Option<u8>,
    },
    /// Create demo patients P001..
    SeedPatients {
        #[arg(long, default_value = "10")]
        count: usize,
    },
    /// Regenerate 24h of history for a patient
    Backfill { id: String },
    /// Print stored readings
    Readings {
        id: String,
        #[arg(long, default_value = "3")]
        hours: f64,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run live flows and print feed events as JSON lines
    Stream {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        /// Backfill each patient before streaming
        #[arg(long)]
        backfill: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn dispatch(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Patients { patient_type } => match patient_type {
            Some(patient_type) => print_json(&get_patients_by_type(state, patient_type)),
            None => {
                let ids = get_patients(state).await.map_err(|e| anyhow!(e))?;
                info!("Patient types: {}", get_patient_types(state).join(", "));
                print_json(&ids)
            }
        },
        Command::Patient { id } => {
            let patient = get_patient(state, id).await.map_err(|e| anyhow!(e))?;
            print_json(&patient)
        }
        Command::AddPatient {
            id,
            patient_type,
            age,
            weight,
            height,
            diabetic,
            diabetes_type,
        } => {
            let input = NewPatient {
                id: Some(id),
                patient_type: Some(patient_type),
                age: Some(age),
                weight: Some(weight),
                height: Some(height),
                has_diabetes: Some(diabetic),
                diabetes_type,
            };
            let patient = add_patient(state, input).await.map_err(|e| anyhow!(e))?;
            print_json(&patient)
        }
        Command::SeedPatients { count } => {
            let mut rng = state.rng.with(|rng| StdRng::seed_from_u64(rng.gen()));
            let created = state.patients.seed_demo_patients(count, &mut rng).await?;
            print_json(&created)
        }
        Command::Backfill { id } => {
            let summary = initialize_patient_data(state, id).await.map_err(|e| anyhow!(e))?;
            print_json(&summary)
        }
        Command::Readings { id, hours, limit } => {
            let readings = get_glucose(state, id, Some(hours), limit)
                .await
                .map_err(|e| anyhow!(e))?;
            print_json(&readings)
        }
        Command::Stream {
            ids,
            duration,
            backfill,
        } => stream(state, ids, duration.map(Duration::from_secs), backfill).await,
    }
}

async fn stream(
    state: &AppState,
    ids: Vec<String>,
    duration: Option<Duration>,
    backfill: bool,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<GlucoseUpdate>();
    let mut forwarders = Vec::with_capacity(ids.len());

    for id in &ids {
        if backfill {
            initialize_patient_data(state, id.clone())
                .await
                .map_err(|e| anyhow!(e))?;
        }

        let subscription = state.glucose.subscribe(&state.feed, id).await?;
        if let Some(current) = subscription.current {
            println!("{}", serde_json::to_string(&GlucoseUpdate::single(current))?);
        }
        forwarders.push(tokio::spawn(forward(subscription.receiver, tx.clone())));

        start_data_flow(state, id.clone())
            .await
            .map_err(|e| anyhow!(e))?;
    }
    drop(tx);

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    let interrupted = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };
    let relayed = relay(&mut rx, deadline, interrupted, &mut std::io::stdout()).await;

    state.flows.shutdown().await;
    for forwarder in forwarders {
        forwarder.abort();
    }
    relayed
}

/// Write feed events as JSON lines until the channel closes or either stop
/// future resolves.
async fn relay<W: Write>(
    rx: &mut mpsc::UnboundedReceiver<GlucoseUpdate>,
    deadline: impl Future<Output = ()>,
    interrupted: impl Future<Output = ()>,
    out: &mut W,
) -> Result<()> {
    tokio::pin!(deadline);
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => writeln!(out, "{}", serde_json::to_string(&event)?)?,
                None => break,
            },
            _ = &mut deadline => {
                info!("Stream duration elapsed");
                break;
            }
            _ = &mut interrupted => {
                info!("Interrupted, stopping data flows");
                break;
            }
        }
    }
    Ok(())
}

async fn forward(
    mut receiver: broadcast::Receiver<GlucoseUpdate>,
    tx: mpsc::UnboundedSender<GlucoseUpdate>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if tx.send(event).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Feed subscriber lagged, skipped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
