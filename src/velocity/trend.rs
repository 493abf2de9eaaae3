//! Window-over-window trend analysis.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::measure::VelocityMeasurement;

fn default_window_days() -> u32 {
    7
}

fn default_acceleration_threshold_percent() -> f64 {
    20.0
}

fn default_rapid_growth_threshold() -> f64 {
    10.0
}

/// Velocity tracking policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VelocityConfig {
    /// Length of the current and previous windows, in days.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Percent change in rate that counts as acceleration (or, negated,
    /// deceleration).
    #[serde(default = "default_acceleration_threshold_percent")]
    pub acceleration_threshold_percent: f64,
    /// Capability gain per day above which growth is "rapid".
    #[serde(default = "default_rapid_growth_threshold")]
    pub rapid_growth_threshold: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            acceleration_threshold_percent: default_acceleration_threshold_percent(),
            rapid_growth_threshold: default_rapid_growth_threshold(),
        }
    }
}

/// Comparison of two consecutive windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityTrend {
    /// Agent measured.
    pub agent_id: String,
    /// Rate in the current window.
    pub current_rate: f64,
    /// Rate in the preceding window, if one was supplied.
    pub previous_rate: Option<f64>,
    /// `(current − previous) / previous × 100`; `0.0` when undefined.
    pub acceleration_percent: f64,
    /// Acceleration above `+threshold`.
    pub is_accelerating: bool,
    /// Acceleration below `−threshold`.
    pub is_decelerating: bool,
    /// Current rate above the rapid-growth threshold.
    pub is_rapid_growth: bool,
}

/// Compare `current` against `previous`.
///
/// With no previous window, or a previous rate of zero, acceleration is
/// undefined: reported as `0.0` and neither flag is set. Rapid growth is
/// judged on `current` alone.
///
/// # Panics
/// This function never panics.
pub fn analyze_velocity_trend(
    current: &VelocityMeasurement,
    previous: Option<&VelocityMeasurement>,
    config: &VelocityConfig,
) -> VelocityTrend {
    let rate = current.capability_gain_per_day;
    let acceleration = previous
        .map(|p| p.capability_gain_per_day)
        .filter(|prev| *prev != 0.0)
        .map(|prev| (rate - prev) / prev * 100.0);

    let threshold = config.acceleration_threshold_percent;
    VelocityTrend {
        agent_id: current.agent_id.clone(),
        current_rate: rate,
        previous_rate: previous.map(|p| p.capability_gain_per_day),
        acceleration_percent: acceleration.unwrap_or(0.0),
        is_accelerating: acceleration.is_some_and(|a| a > threshold),
        is_decelerating: acceleration.is_some_and(|a| a < -threshold),
        is_rapid_growth: rate > config.rapid_growth_threshold,
    }
}
