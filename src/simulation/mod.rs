pub mod backfill;
pub mod config;
pub mod model;
pub mod rng;

pub use backfill::{Backfill, BackfillGenerator, BACKFILL_INTERVAL_MINUTES, BACKFILL_POINTS};
pub use config::ModelConfig;
pub use model::{clamp_glucose, GlucoseModel, Meal, SimulationState, GLUCOSE_MAX, GLUCOSE_MIN};
pub use rng::SharedRng;
