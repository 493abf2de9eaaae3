//! # Capability Scorer
//!
//! ## Responsibility
//! Collapse a validated improvement into a single weighted "capability gain"
//! scalar. This scalar is the unit of account for all velocity and gating
//! logic.
//!
//! ## Guarantees
//! - Pure and deterministic:
//!   `gain = performance × 0.4 + cost × 0.3 + reliability × 0.3`, evaluated
//!   in exactly that order.
//! - The weights are policy constants, not learned.
//!
//! ## NOT Responsible For
//! - Deciding whether an improvement is valid (see `impact::measurer`)
//! - Aggregating gains over time (see `velocity`)

use serde::{Deserialize, Serialize};

use crate::impact::ImpactMetrics;

/// Weight applied to the performance (speed) gain, in percent.
pub const PERFORMANCE_WEIGHT: f64 = 0.4;

/// Weight applied to the cost reduction, in percent.
pub const COST_WEIGHT: f64 = 0.3;

/// Weight applied to the success-rate increase, in percentage points.
pub const RELIABILITY_WEIGHT: f64 = 0.3;

/// Capability gain of a validated improvement.
///
/// # Panics
/// This function never panics.
pub fn capability_gain(impact: &ImpactMetrics) -> f64 {
    weighted_gain(
        impact.performance_gain_percent,
        impact.cost_reduction_percent,
        impact.success_rate_increase,
    )
}

/// Weighted sum of the three component deltas.
pub fn weighted_gain(
    performance_gain_percent: f64,
    cost_reduction_percent: f64,
    success_rate_increase: f64,
) -> f64 {
    performance_gain_percent * PERFORMANCE_WEIGHT
        + cost_reduction_percent * COST_WEIGHT
        + success_rate_increase * RELIABILITY_WEIGHT
}

/// Per-component contributions to a capability gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilityBreakdown {
    /// `performance_gain_percent × 0.4`.
    pub performance: f64,
    /// `cost_reduction_percent × 0.3`.
    pub cost: f64,
    /// `success_rate_increase × 0.3`.
    pub reliability: f64,
    /// Sum of the three.
    pub total: f64,
}

/// Break a capability gain down by component.
pub fn breakdown(impact: &ImpactMetrics) -> CapabilityBreakdown {
    CapabilityBreakdown {
        performance: impact.performance_gain_percent * PERFORMANCE_WEIGHT,
        cost: impact.cost_reduction_percent * COST_WEIGHT,
        reliability: impact.success_rate_increase * RELIABILITY_WEIGHT,
        total: capability_gain(impact),
    }
}

/// Stateless handle for callers that prefer a service object.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityScorer;

impl CapabilityScorer {
    /// See [`capability_gain`].
    pub fn capability_gain(&self, impact: &ImpactMetrics) -> f64 {
        capability_gain(impact)
    }

    /// Sum of capability gains over a slice of improvements.
    pub fn total_gain(&self, impacts: &[ImpactMetrics]) -> f64 {
        impacts.iter().map(capability_gain).sum()
    }
}
