//! Impact measurement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::roi::RoiCalculation;

/// Length of the baseline and test periods, in days. Fixed by policy.
pub const MEASUREMENT_PERIOD_DAYS: u32 = 7;

/// Aggregate telemetry over one period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PeriodMetrics {
    /// Mean latency per operation, in milliseconds.
    pub avg_latency_ms: f64,
    /// Mean cost per operation, in cents.
    pub avg_cost_cents: f64,
    /// Fraction of successful operations, in `[0, 1]`.
    pub success_rate: f64,
    /// Number of operations observed.
    pub total_operations: u64,
}

/// Percentage deltas between a baseline and a test period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImprovementDeltas {
    /// Positive = faster.
    pub speed_improvement_percent: f64,
    /// Positive = cheaper.
    pub cost_reduction_percent: f64,
    /// Positive = more reliable, in percentage points.
    pub reliability_improvement_percentage_points: f64,
}

/// One day of the test period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMeasurement {
    /// 1-based day index within the test period.
    pub day: u32,
    /// Start of the day window.
    pub date: DateTime<Utc>,
    /// Aggregates for the day.
    pub metrics: PeriodMetrics,
}

/// Outcome of a fixed-window baseline-vs-test trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactMeasurementResult {
    /// Proposal that was measured.
    pub proposal_id: String,
    /// Sandbox the proposal was trialled in.
    pub sandbox_id: String,
    /// Always [`MEASUREMENT_PERIOD_DAYS`].
    pub measurement_period_days: u32,
    /// Start of the test period.
    pub start_date: DateTime<Utc>,
    /// End of the test period (exclusive).
    pub end_date: DateTime<Utc>,
    /// Aggregates over the baseline period.
    pub baseline: PeriodMetrics,
    /// Aggregates over the test period.
    pub test_period: PeriodMetrics,
    /// Deltas derived from `baseline` and `test_period` only.
    pub improvements: ImprovementDeltas,
    /// One snapshot per test day, oldest first.
    pub daily_measurements: Vec<DailyMeasurement>,
    /// Verdict.
    pub validated: bool,
    /// Names the metric(s) that drove the verdict.
    pub validation_reason: String,
}

impl ImpactMeasurementResult {
    /// Test days whose success rate fell more than `tolerance_pp` percentage
    /// points below the baseline. Days without operations are ignored.
    pub fn transient_regressions(&self, tolerance_pp: f64) -> Vec<&DailyMeasurement> {
        self.daily_measurements
            .iter()
            .filter(|d| d.metrics.total_operations > 0)
            .filter(|d| (d.metrics.success_rate - self.baseline.success_rate) * 100.0 < -tolerance_pp)
            .collect()
    }
}

/// Verdict recorded on an [`ImpactMetrics`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// The improvement passed measurement.
    Validated,
    /// The improvement failed measurement.
    Rejected,
}

/// Durable, capability-scorable record of a completed measurement.
///
/// Immutable once created; the per-agent sequence of these forms the
/// append-only log the velocity tracker folds over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactMetrics {
    /// Improvement identifier (`imp-<proposal id>`).
    pub improvement_id: String,
    /// Proposal the improvement came from.
    pub proposal_id: String,
    /// Agent the improvement belongs to.
    pub agent_id: String,
    /// Length of the measurement periods, in days.
    pub measurement_period_days: u32,
    /// Speed improvement, in percent.
    pub performance_gain_percent: f64,
    /// Cost reduction, in percent.
    pub cost_reduction_percent: f64,
    /// Success-rate increase, in percentage points.
    pub success_rate_increase: f64,
    /// Baseline aggregates.
    pub baseline: PeriodMetrics,
    /// Test-period aggregates.
    pub improved: PeriodMetrics,
    /// Cost/benefit summary.
    pub roi: RoiCalculation,
    /// When the measurement completed.
    pub measured_at: DateTime<Utc>,
    /// Verdict.
    pub validation_status: ValidationStatus,
}

impl ImpactMetrics {
    /// Improvement id derived from a proposal id.
    pub fn improvement_id_for(proposal_id: &str) -> String {
        format!("imp-{proposal_id}")
    }

    /// Build the durable record for a completed measurement.
    pub fn from_measurement(
        agent_id: impl Into<String>,
        result: &ImpactMeasurementResult,
        roi: RoiCalculation,
        measured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            improvement_id: Self::improvement_id_for(&result.proposal_id),
            proposal_id: result.proposal_id.clone(),
            agent_id: agent_id.into(),
            measurement_period_days: result.measurement_period_days,
            performance_gain_percent: result.improvements.speed_improvement_percent,
            cost_reduction_percent: result.improvements.cost_reduction_percent,
            success_rate_increase: result.improvements.reliability_improvement_percentage_points,
            baseline: result.baseline,
            improved: result.test_period,
            roi,
            measured_at,
            validation_status: if result.validated {
                ValidationStatus::Validated
            } else {
                ValidationStatus::Rejected
            },
        }
    }

    /// Return `true` if this entry counts toward velocity.
    pub fn is_validated(&self) -> bool {
        self.validation_status == ValidationStatus::Validated
    }
}
