pub mod cli;
pub mod clock;
pub mod context;
pub mod db;
pub mod error;
pub mod feed;
pub mod flow;
pub mod glucose;
pub mod patients;
pub mod settings;
pub mod simulation;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use clock::{Clock, RuntimeClock};
use context::SimContext;
use db::Database;
use feed::FeedHub;
use flow::FlowController;
use glucose::GlucoseService;
use patients::{PatientRegistry, Roster};
use settings::{AppConfig, StorageKind};
use simulation::{GlucoseModel, SharedRng};
use store::{MemoryStore, PatientRecords, ReadingStore};

pub struct AppState {
    pub config: AppConfig,
    pub feed: Arc<FeedHub>,
    pub patients: Arc<PatientRegistry>,
    pub glucose: GlucoseService,
    pub flows: FlowController,
    pub rng: SharedRng,
}

impl AppState {
    /// Open storage, load the roster and wire every service.
    pub fn initialize(config: AppConfig) -> Result<Self> {
        let roster = load_roster(&config)?;

        let state = match config.storage {
            StorageKind::Sqlite => {
                let database = if config.reset_database {
                    Database::recreate(config.database_path.clone())?
                } else {
                    Database::new(config.database_path.clone())?
                };
                info!("Using SQLite storage at {}", database.path().display());
                let database = Arc::new(database);
                Self::assemble(
                    config,
                    roster,
                    database.clone(),
                    database,
                    Arc::new(RuntimeClock::new()),
                )
            }
            StorageKind::Memory => {
                info!("Using in-memory storage");
                let store = Arc::new(MemoryStore::new());
                Self::assemble(
                    config,
                    roster,
                    store.clone(),
                    store,
                    Arc::new(RuntimeClock::new()),
                )
            }
        };
        Ok(state)
    }

    /// Wire services over explicit collaborators.
    pub fn assemble(
        config: AppConfig,
        roster: Roster,
        store: Arc<dyn ReadingStore>,
        records: Arc<dyn PatientRecords>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let feed = Arc::new(FeedHub::new(config.feed_capacity));
        let patients = Arc::new(PatientRegistry::new(roster, records));
        let rng = SharedRng::new(config.seed);

        let ctx = SimContext {
            store,
            patients: patients.clone(),
            feed: feed.clone(),
            clock,
            model: Arc::new(GlucoseModel::default()),
            rng: rng.clone(),
        };

        Self {
            glucose: GlucoseService::new(ctx.clone()),
            flows: FlowController::new(ctx, config.tick_interval()),
            config,
            feed,
            patients,
            rng,
        }
    }
}

fn load_roster(config: &AppConfig) -> Result<Roster> {
    match config.resolve_patients_csv() {
        Some(path) if path.exists() => Roster::load(&path),
        Some(path) => {
            warn!("Patient CSV not found at {}, roster is empty", path.display());
            Ok(Roster::default())
        }
        None => {
            warn!("No patient CSV found, roster is empty");
            Ok(Roster::default())
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // reads RUST_LOG as well
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

pub async fn run() -> Result<()> {
    let cli = cli::Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.reset_db {
        config.reset_database = true;
    }
    if cli.memory {
        config.storage = StorageKind::Memory;
    }
    init_logging(config.debug);

    info!("glucoflow starting up...");
    let state = AppState::initialize(config)?;
    cli::dispatch(&state, cli.command).await
}
