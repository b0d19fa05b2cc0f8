use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const PATIENT_CSV_CANDIDATES: [&str; 2] = ["data/patient.csv", "patient.csv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub patients_csv: Option<PathBuf>,
    /// Recreate the database file on startup.
    pub reset_database: bool,
    pub storage: StorageKind,
    pub tick_interval_secs: u64,
    pub seed: Option<u64>,
    pub feed_capacity: usize,
    #[serde(skip)]
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("instance/glucose.sqlite3"),
            patients_csv: None,
            reset_database: false,
            storage: StorageKind::Sqlite,
            tick_interval_secs: 5,
            seed: None,
            feed_capacity: 256,
            debug: false,
        }
    }
}

impl AppConfig {
    /// Read the JSON config at `path` (defaults when absent), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            _ => AppConfig::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(db) = var("GLUCOFLOW_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(csv) = var("GLUCOFLOW_PATIENTS_CSV") {
            self.patients_csv = Some(PathBuf::from(csv));
        }
        if let Some(seed) = var("GLUCOFLOW_SEED") {
            let seed = seed
                .trim()
                .parse()
                .with_context(|| format!("GLUCOFLOW_SEED must be an integer, got {seed:?}"))?;
            self.seed = Some(seed);
        }
        if let Some(debug) = var("GLUCOFLOW_DEBUG") {
            self.debug = debug == "1" || debug.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            bail!("tick_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Configured roster path, or the first default location that exists.
    pub fn resolve_patients_csv(&self) -> Option<PathBuf> {
        if let Some(path) = &self.patients_csv {
            return Some(path.clone());
        }
        PATIENT_CSV_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists())
    }
}
