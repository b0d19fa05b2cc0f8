use std::f64::consts::PI;

use chrono::{DateTime, TimeZone, Timelike};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::config::ModelConfig;

pub const GLUCOSE_MIN: f64 = 40.0;
pub const GLUCOSE_MAX: f64 = 300.0;

pub fn clamp_glucose(value: f64) -> f64 {
    value.clamp(GLUCOSE_MIN, GLUCOSE_MAX)
}

/// Fractional hour of day, e.g. 07:30 -> 7.5.
pub fn hour_of_day<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> f64 {
    timestamp.hour() as f64 + timestamp.minute() as f64 / 60.0
}

/// Minimum distance between two hours on a 24h circle.
fn circular_hour_distance(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(24.0);
    diff.min(24.0 - diff)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meal {
    pub hour_of_day: f64,
    pub intensity: f64,
}

/// Per-run state of the backfill walk. Lives only as long as one backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub previous_value: f64,
    pub baseline: f64,
    pub variability: f64,
    /// Empty when no meal effect applies.
    pub meal_schedule: Vec<Meal>,
}

/// Stochastic glucose process. Stateless apart from its constants, so a single
/// instance can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct GlucoseModel {
    config: ModelConfig,
}

impl GlucoseModel {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Draw baseline, variability and meal intensities for one backfill run.
    pub fn draw_state<R: Rng + ?Sized>(&self, has_diabetes: bool, rng: &mut R) -> SimulationState {
        let (baseline, variability) = if has_diabetes {
            (
                rng.gen_range(self.config.diabetic_baseline.clone()) as f64,
                rng.gen_range(self.config.diabetic_variability.clone()),
            )
        } else {
            (
                rng.gen_range(self.config.normal_baseline.clone()) as f64,
                rng.gen_range(self.config.normal_variability.clone()),
            )
        };

        let meal_schedule = self
            .config
            .meals
            .iter()
            .map(|template| Meal {
                hour_of_day: template.hour_of_day,
                intensity: rng.gen_range(template.intensity.clone()),
            })
            .collect();

        SimulationState {
            previous_value: baseline,
            baseline,
            variability,
            meal_schedule,
        }
    }

    pub fn meal_effect(&self, meals: &[Meal], hour: f64) -> f64 {
        let width = self.config.meal_width_hours;
        meals
            .iter()
            .filter_map(|meal| {
                let delta = circular_hour_distance(hour, meal.hour_of_day);
                (delta < self.config.meal_window_hours)
                    .then(|| meal.intensity * (-(delta * delta) / (2.0 * width * width)).exp())
            })
            .sum()
    }

    pub fn circadian_effect(&self, hour: f64) -> f64 {
        self.config.circadian_amplitude * (2.0 * PI * hour / 24.0).sin()
    }

    pub fn target_value(&self, state: &SimulationState, hour: f64) -> f64 {
        state.baseline + self.meal_effect(&state.meal_schedule, hour) + self.circadian_effect(hour)
    }

    /// Deterministic part of a backfill step: regression from `previous`
    /// toward `target`.
    pub fn blend(&self, previous: f64, target: f64) -> f64 {
        let r = self.config.regression_weight;
        r * previous + (1.0 - r) * target
    }

    /// Push `value` away from the current trend relative to `baseline`.
    pub fn excursion<R: Rng + ?Sized>(&self, value: f64, baseline: f64, rng: &mut R) -> f64 {
        let direction = if value < baseline { 1.0 } else { -1.0 };
        value + direction * rng.gen_range(self.config.excursion_magnitude.clone())
    }

    /// One step of the dense historical walk. Does not update `state`.
    pub fn backfill_step<R: Rng + ?Sized>(
        &self,
        state: &SimulationState,
        has_diabetes: bool,
        hour: f64,
        rng: &mut R,
    ) -> f64 {
        let target = self.target_value(state, hour);
        let mut next = self.blend(state.previous_value, target);

        let sd = state.variability.max(0.0) / self.config.noise_divisor;
        if let Ok(noise) = Normal::new(0.0, sd) {
            next += noise.sample(rng);
        }

        if has_diabetes && rng.gen_bool(self.config.excursion_probability) {
            next = self.excursion(next, state.baseline, rng);
        }

        clamp_glucose(next)
    }

    /// One step of the incremental live feed: bounded mean-reverting walk.
    pub fn live_step<R: Rng + ?Sized>(&self, previous: f64, has_diabetes: bool, rng: &mut R) -> f64 {
        let span = if has_diabetes {
            self.config.diabetic_live_change
        } else {
            self.config.normal_live_change
        };
        let mut change = rng.gen_range(-span..=span);

        if previous > self.config.high_threshold {
            change -= rng.gen_range(0.0..=self.config.max_pull);
        } else if previous < self.config.low_threshold {
            change += rng.gen_range(0.0..=self.config.max_pull);
        }

        clamp_glucose(previous + change)
    }

    /// Starting value when a patient has no history.
    pub fn initial_value<R: Rng + ?Sized>(&self, has_diabetes: bool, rng: &mut R) -> f64 {
        let range = if has_diabetes {
            self.config.diabetic_baseline.clone()
        } else {
            self.config.normal_baseline.clone()
        };
        rng.gen_range(range) as f64
    }

    /// Neutral starting value used when a flow is (re)started.
    pub fn reset_value<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.gen_range(self.config.reset_range.clone()) as f64
    }
}
