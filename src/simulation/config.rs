use std::ops::RangeInclusive;

/// Meal placement used when drawing a fresh backfill profile. The intensity is
/// drawn once per run from `intensity`.
#[derive(Debug, Clone)]
pub struct MealTemplate {
    pub hour_of_day: f64,
    pub intensity: RangeInclusive<f64>,
}

/// Tunable constants of the glucose process model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Weight kept from the previous value when blending toward the target.
    pub regression_weight: f64,
    /// Noise standard deviation is `variability / noise_divisor`.
    pub noise_divisor: f64,
    /// Per-step probability of an excursion for diabetic patients.
    pub excursion_probability: f64,
    pub excursion_magnitude: RangeInclusive<f64>,
    pub circadian_amplitude: f64,
    /// Gaussian width (hours) of a meal's effect.
    pub meal_width_hours: f64,
    /// Meals further than this (hours, circular) contribute nothing.
    pub meal_window_hours: f64,
    pub meals: Vec<MealTemplate>,

    pub diabetic_baseline: RangeInclusive<i64>,
    pub diabetic_variability: RangeInclusive<f64>,
    pub normal_baseline: RangeInclusive<i64>,
    pub normal_variability: RangeInclusive<f64>,

    /// Live walk step range, symmetric around zero.
    pub diabetic_live_change: f64,
    pub normal_live_change: f64,
    /// Above this value the live walk gets an extra pull-down.
    pub high_threshold: f64,
    /// Below this value the live walk gets an extra pull-up.
    pub low_threshold: f64,
    pub max_pull: f64,
    /// Neutral starting range used when a flow is (re)started.
    pub reset_range: RangeInclusive<i64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            regression_weight: 0.85,
            noise_divisor: 6.0,
            excursion_probability: 0.03,
            excursion_magnitude: 15.0..=30.0,
            circadian_amplitude: 8.0,
            meal_width_hours: 0.5,
            meal_window_hours: 3.0,
            meals: vec![
                MealTemplate {
                    hour_of_day: 7.5,
                    intensity: 20.0..=40.0,
                },
                MealTemplate {
                    hour_of_day: 12.5,
                    intensity: 25.0..=45.0,
                },
                MealTemplate {
                    hour_of_day: 18.5,
                    intensity: 30.0..=50.0,
                },
            ],
            diabetic_baseline: 120..=180,
            diabetic_variability: 15.0..=25.0,
            normal_baseline: 70..=120,
            normal_variability: 5.0..=15.0,
            diabetic_live_change: 10.0,
            normal_live_change: 3.0,
            high_threshold: 140.0,
            low_threshold: 70.0,
            max_pull: 3.0,
            reset_range: 85..=115,
        }
    }
}
