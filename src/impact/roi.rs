//! # Return on Investment
//!
//! ## Responsibility
//! Summarise the cost and benefit of one improvement: what it cost to build
//! and trial, what it is projected to save over a fixed horizon, how long it
//! takes to pay back, and a bounded overall value score.
//!
//! ## Guarantees
//! - Derived once per measurement; never mutated afterwards.
//! - `overall_value_score` is always within `[0, 100]`.
//! - `payback_period_days` is `None` when the improvement saves nothing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{PeriodMetrics, MEASUREMENT_PERIOD_DAYS};
use crate::proposal::ImprovementKind;

fn default_projection_days() -> u32 {
    30
}

fn default_model_switch_cost() -> f64 {
    200.0
}

fn default_parameter_tune_cost() -> f64 {
    50.0
}

fn default_tool_swap_cost() -> f64 {
    150.0
}

fn default_strategy_update_cost() -> f64 {
    300.0
}

/// Cost model for ROI calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoiConfig {
    /// Savings projection horizon, in days.
    #[serde(default = "default_projection_days")]
    pub projection_days: u32,
    /// Implementation cost of a model switch, in cents.
    #[serde(default = "default_model_switch_cost")]
    pub model_switch_cost_cents: f64,
    /// Implementation cost of a parameter tune, in cents.
    #[serde(default = "default_parameter_tune_cost")]
    pub parameter_tune_cost_cents: f64,
    /// Implementation cost of a tool swap, in cents.
    #[serde(default = "default_tool_swap_cost")]
    pub tool_swap_cost_cents: f64,
    /// Implementation cost of a strategy update, in cents.
    #[serde(default = "default_strategy_update_cost")]
    pub strategy_update_cost_cents: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            projection_days: default_projection_days(),
            model_switch_cost_cents: default_model_switch_cost(),
            parameter_tune_cost_cents: default_parameter_tune_cost(),
            tool_swap_cost_cents: default_tool_swap_cost(),
            strategy_update_cost_cents: default_strategy_update_cost(),
        }
    }
}

impl RoiConfig {
    /// Implementation cost for a change kind, in cents.
    pub fn implementation_cost(&self, kind: ImprovementKind) -> f64 {
        match kind {
            ImprovementKind::ModelSwitch => self.model_switch_cost_cents,
            ImprovementKind::ParameterTune => self.parameter_tune_cost_cents,
            ImprovementKind::ToolSwap => self.tool_swap_cost_cents,
            ImprovementKind::StrategyUpdate => self.strategy_update_cost_cents,
        }
    }
}

/// Cost/benefit summary for one improvement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RoiCalculation {
    /// Cost of building the change, in cents.
    pub implementation_cost_cents: f64,
    /// Cost of the sandbox trial, in cents.
    pub testing_cost_cents: f64,
    /// Implementation plus testing.
    pub total_investment_cents: f64,
    /// Savings projected over the horizon, in cents.
    pub projected_savings_cents: f64,
    /// Projection horizon, in days.
    pub projection_days: u32,
    /// Days until savings cover the investment; `None` if never.
    pub payback_period_days: Option<f64>,
    /// Projected savings minus investment, in cents.
    pub net_benefit_cents: f64,
    /// Overall value in `[0, 100]`.
    pub overall_value_score: f64,
}

/// Compute the ROI of an improvement.
///
/// `sandbox_samples` is the number of trial executions run in the sandbox;
/// each is costed at the baseline per-operation cost. Daily volume is taken
/// from the test period.
///
/// # Panics
/// This function never panics.
pub fn calculate_roi(
    kind: ImprovementKind,
    baseline: &PeriodMetrics,
    test_period: &PeriodMetrics,
    sandbox_samples: usize,
    capability_gain: f64,
    config: &RoiConfig,
) -> RoiCalculation {
    let implementation_cost_cents = config.implementation_cost(kind);
    let testing_cost_cents = sandbox_samples as f64 * baseline.avg_cost_cents;
    let total_investment_cents = implementation_cost_cents + testing_cost_cents;

    let daily_operations = test_period.total_operations as f64 / f64::from(MEASUREMENT_PERIOD_DAYS);
    let daily_savings = (baseline.avg_cost_cents - test_period.avg_cost_cents) * daily_operations;
    let projected_savings_cents = daily_savings * f64::from(config.projection_days);

    let payback_period_days = if daily_savings > 0.0 {
        Some(total_investment_cents / daily_savings)
    } else {
        None
    };

    let net_benefit_cents = projected_savings_cents - total_investment_cents;

    let roi_percent = if total_investment_cents > 0.0 {
        net_benefit_cents / total_investment_cents * 100.0
    } else if net_benefit_cents > 0.0 {
        100.0
    } else {
        0.0
    };
    let savings_component = (roi_percent / 4.0).clamp(0.0, 50.0);
    let gain_component = capability_gain.clamp(0.0, 50.0);
    let overall_value_score = (savings_component + gain_component).clamp(0.0, 100.0);

    RoiCalculation {
        implementation_cost_cents,
        testing_cost_cents,
        total_investment_cents,
        projected_savings_cents,
        projection_days: config.projection_days,
        payback_period_days,
        net_benefit_cents,
        overall_value_score,
    }
}
