//! Window folds over the impact log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impact::ImpactMetrics;
use crate::scoring::{self, COST_WEIGHT, PERFORMANCE_WEIGHT, RELIABILITY_WEIGHT};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Rate of capability gain over one window.
///
/// An ephemeral view: recomputing from the same log and window always
/// yields the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityMeasurement {
    /// Agent measured.
    pub agent_id: String,
    /// Window start (inclusive).
    pub window_start_date: DateTime<Utc>,
    /// Window end.
    pub window_end_date: DateTime<Utc>,
    /// Window length, in days.
    pub window_days: f64,
    /// Sum of capability gains in the window.
    pub capability_gain_percent: f64,
    /// `capability_gain_percent / window_days`.
    pub capability_gain_per_day: f64,
    /// Weighted performance contribution per day.
    pub performance_gain_per_day: f64,
    /// Weighted cost contribution per day.
    pub cost_reduction_per_day: f64,
    /// Weighted reliability contribution per day.
    pub reliability_gain_per_day: f64,
    /// Validated improvements in the window.
    pub improvements_in_window: usize,
    /// `improvements_in_window / window_days`.
    pub improvement_rate_per_day: f64,
    /// Equal to `window_end_date`.
    pub measured_at: DateTime<Utc>,
}

impl VelocityMeasurement {
    /// A measurement with every rate zeroed.
    pub fn zero(agent_id: &str, start: DateTime<Utc>, end: DateTime<Utc>, window_days: f64) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            window_start_date: start,
            window_end_date: end,
            window_days,
            capability_gain_percent: 0.0,
            capability_gain_per_day: 0.0,
            performance_gain_per_day: 0.0,
            cost_reduction_per_day: 0.0,
            reliability_gain_per_day: 0.0,
            improvements_in_window: 0,
            improvement_rate_per_day: 0.0,
            measured_at: end,
        }
    }
}

/// Bounds of a velocity window. `start` is always inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VelocityWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// End instant.
    pub end: DateTime<Utc>,
    /// Whether an entry measured exactly at `end` belongs to the window.
    pub include_end: bool,
}

impl VelocityWindow {
    /// `[start, end]`.
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            include_end: true,
        }
    }

    /// `[start, end)`.
    pub fn half_open(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            include_end: false,
        }
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && if self.include_end { at <= self.end } else { at < self.end }
    }

    fn days(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / MILLIS_PER_DAY
    }
}

/// Velocity of `agent_id` over the closed window `[window_start, window_end]`.
///
/// Only validated entries for `agent_id` count. An empty or zero-length
/// window yields all-zero rates.
///
/// # Panics
/// This function never panics.
pub fn measure_velocity(
    agent_id: &str,
    improvements: &[ImpactMetrics],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> VelocityMeasurement {
    measure_window(agent_id, improvements, VelocityWindow::closed(window_start, window_end))
}

/// Velocity of `agent_id` over an explicit [`VelocityWindow`].
pub fn measure_window(
    agent_id: &str,
    improvements: &[ImpactMetrics],
    window: VelocityWindow,
) -> VelocityMeasurement {
    let days = window.days();
    if days <= 0.0 {
        return VelocityMeasurement::zero(agent_id, window.start, window.end, days.max(0.0));
    }

    let in_window: Vec<&ImpactMetrics> = improvements
        .iter()
        .filter(|m| m.agent_id == agent_id && m.is_validated() && window.contains(m.measured_at))
        .collect();
    if in_window.is_empty() {
        return VelocityMeasurement::zero(agent_id, window.start, window.end, days);
    }

    let total: f64 = in_window.iter().map(|m| scoring::capability_gain(m)).sum();
    let perf: f64 = in_window.iter().map(|m| m.performance_gain_percent).sum();
    let cost: f64 = in_window.iter().map(|m| m.cost_reduction_percent).sum();
    let rel: f64 = in_window.iter().map(|m| m.success_rate_increase).sum();
    let count = in_window.len();

    VelocityMeasurement {
        agent_id: agent_id.to_string(),
        window_start_date: window.start,
        window_end_date: window.end,
        window_days: days,
        capability_gain_percent: total,
        capability_gain_per_day: total / days,
        performance_gain_per_day: perf * PERFORMANCE_WEIGHT / days,
        cost_reduction_per_day: cost * COST_WEIGHT / days,
        reliability_gain_per_day: rel * RELIABILITY_WEIGHT / days,
        improvements_in_window: count,
        improvement_rate_per_day: count as f64 / days,
        measured_at: window.end,
    }
}
