//! # Impact Measurer
//!
//! ## Responsibility
//! Compare a 7-day baseline period against the 7-day test period that
//! follows it, derive percentage deltas, and render a validation verdict.
//!
//! ## Guarantees
//! - Windows are fixed: baseline = `[now-14d, now-7d)`, test = `[now-7d, now)`.
//! - Exactly [`MEASUREMENT_PERIOD_DAYS`] daily snapshots, oldest first.
//! - Suspends only while reading the metrics store; all arithmetic is
//!   synchronous.
//! - Reliability is a hard veto: no cost or speed gain buys back a drop in
//!   success rate beyond `max_reliability_drop_pp`.
//!
//! ## NOT Responsible For
//! - Statistical significance (the verdict is threshold-based)
//! - Persisting the result (see `pipeline`)

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::roi::{calculate_roi, RoiConfig};
use super::types::{
    DailyMeasurement, ImpactMeasurementResult, ImpactMetrics, ImprovementDeltas, PeriodMetrics,
    MEASUREMENT_PERIOD_DAYS,
};
use crate::clock::SharedClock;
use crate::proposal::ImprovementProposal;
use crate::sandbox::SandboxEnvironment;
use crate::scoring;
use crate::store::{MetricsStore, StoreError};
use crate::GovernanceError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_min_cost_reduction_percent() -> f64 {
    10.0
}

fn default_min_speed_improvement_percent() -> f64 {
    10.0
}

fn default_min_reliability_improvement_pp() -> f64 {
    5.0
}

fn default_max_reliability_drop_pp() -> f64 {
    5.0
}

/// Validation thresholds. All comparisons are strict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImpactConfig {
    /// Validate when cost falls by more than this, in percent.
    #[serde(default = "default_min_cost_reduction_percent")]
    pub min_cost_reduction_percent: f64,
    /// Validate when latency falls by more than this, in percent.
    #[serde(default = "default_min_speed_improvement_percent")]
    pub min_speed_improvement_percent: f64,
    /// Validate when success rate rises by more than this, in percentage points.
    #[serde(default = "default_min_reliability_improvement_pp")]
    pub min_reliability_improvement_pp: f64,
    /// Reject when success rate falls by more than this, in percentage points.
    #[serde(default = "default_max_reliability_drop_pp")]
    pub max_reliability_drop_pp: f64,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            min_cost_reduction_percent: default_min_cost_reduction_percent(),
            min_speed_improvement_percent: default_min_speed_improvement_percent(),
            min_reliability_improvement_pp: default_min_reliability_improvement_pp(),
            max_reliability_drop_pp: default_max_reliability_drop_pp(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pure calculations
// ---------------------------------------------------------------------------

/// Round to 9 decimal places so that deltas sitting on a policy constant
/// compare as equal to it.
fn snap(x: f64) -> f64 {
    (x * 1e9).round() / 1e9
}

fn percent_drop(baseline: f64, test: f64) -> f64 {
    if baseline == 0.0 {
        return 0.0;
    }
    snap((baseline - test) / baseline * 100.0)
}

/// Derive deltas from the two period aggregates.
///
/// Deltas against a zero baseline are `0.0`.
///
/// # Panics
/// This function never panics.
pub fn compute_improvements(baseline: &PeriodMetrics, test_period: &PeriodMetrics) -> ImprovementDeltas {
    ImprovementDeltas {
        speed_improvement_percent: percent_drop(baseline.avg_latency_ms, test_period.avg_latency_ms),
        cost_reduction_percent: percent_drop(baseline.avg_cost_cents, test_period.avg_cost_cents),
        reliability_improvement_percentage_points: snap(
            (test_period.success_rate - baseline.success_rate) * 100.0,
        ),
    }
}

/// Render the verdict for a set of deltas.
///
/// Returns `(validated, reason)`; the reason names every metric that drove
/// the verdict.
pub fn validate_improvements(deltas: &ImprovementDeltas, config: &ImpactConfig) -> (bool, String) {
    let cost = deltas.cost_reduction_percent;
    let speed = deltas.speed_improvement_percent;
    let rel = deltas.reliability_improvement_percentage_points;

    if rel < -config.max_reliability_drop_pp {
        return (
            false,
            format!(
                "Reliability degraded by {:.1} percentage points (tolerance {:.1}); \
                 rejected regardless of cost ({cost:+.1}%) and speed ({speed:+.1}%) changes",
                -rel, config.max_reliability_drop_pp
            ),
        );
    }

    let mut passed = Vec::new();
    if cost > config.min_cost_reduction_percent {
        passed.push(format!(
            "cost reduced {cost:.1}% (> {:.1}%)",
            config.min_cost_reduction_percent
        ));
    }
    if speed > config.min_speed_improvement_percent {
        passed.push(format!(
            "speed improved {speed:.1}% (> {:.1}%)",
            config.min_speed_improvement_percent
        ));
    }
    if rel > config.min_reliability_improvement_pp {
        passed.push(format!(
            "reliability improved {rel:.1} pp (> {:.1} pp)",
            config.min_reliability_improvement_pp
        ));
    }

    if passed.is_empty() {
        (
            false,
            format!(
                "Improvements below threshold: cost {cost:.1}% (needs > {:.1}%), \
                 speed {speed:.1}% (needs > {:.1}%), reliability {rel:.1} pp (needs > {:.1} pp)",
                config.min_cost_reduction_percent,
                config.min_speed_improvement_percent,
                config.min_reliability_improvement_pp
            ),
        )
    } else {
        (true, format!("Validated: {}", passed.join("; ")))
    }
}

// ---------------------------------------------------------------------------
// ImpactMeasurer
// ---------------------------------------------------------------------------

/// Runs baseline-vs-test measurements against a [`MetricsStore`].
#[derive(Clone)]
pub struct ImpactMeasurer {
    metrics: Arc<dyn MetricsStore>,
    clock: SharedClock,
    config: ImpactConfig,
    roi: RoiConfig,
}

impl ImpactMeasurer {
    /// Create a measurer.
    pub fn new(
        metrics: Arc<dyn MetricsStore>,
        clock: SharedClock,
        config: ImpactConfig,
        roi: RoiConfig,
    ) -> Self {
        Self {
            metrics,
            clock,
            config,
            roi,
        }
    }

    /// Active validation thresholds.
    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    /// Measure the impact of `proposal`. Consumes the sandbox: it is
    /// discarded once measurement completes.
    ///
    /// # Errors
    /// - [`GovernanceError::ProposalMismatch`] if the sandbox or proposal
    ///   belongs to another agent or proposal.
    /// - [`GovernanceError::Store`] if the metrics store fails.
    pub async fn measure_impact(
        &self,
        agent_id: &str,
        proposal: &ImprovementProposal,
        sandbox: SandboxEnvironment,
    ) -> Result<ImpactMeasurementResult, GovernanceError> {
        if sandbox.proposal_id != proposal.id || sandbox.agent_id != agent_id || proposal.agent_id != agent_id {
            return Err(GovernanceError::ProposalMismatch(format!(
                "sandbox '{}' (agent '{}') cannot measure proposal '{}' for agent '{agent_id}'",
                sandbox.id, sandbox.agent_id, proposal.id
            )));
        }

        let started = Instant::now();
        let now = self.clock.now();
        let period = Duration::days(i64::from(MEASUREMENT_PERIOD_DAYS));
        let test_start = now - period;
        let baseline_start = test_start - period;

        let baseline = self.period_metrics(agent_id, baseline_start, test_start).await?;
        let test_period = self.period_metrics(agent_id, test_start, now).await?;

        let mut daily_measurements = Vec::with_capacity(MEASUREMENT_PERIOD_DAYS as usize);
        for day in 0..MEASUREMENT_PERIOD_DAYS {
            let date = test_start + Duration::days(i64::from(day));
            let metrics = self
                .period_metrics(agent_id, date, date + Duration::days(1))
                .await?;
            daily_measurements.push(DailyMeasurement {
                day: day + 1,
                date,
                metrics,
            });
        }

        let improvements = compute_improvements(&baseline, &test_period);
        let (validated, validation_reason) = validate_improvements(&improvements, &self.config);

        let result = ImpactMeasurementResult {
            proposal_id: proposal.id.clone(),
            sandbox_id: sandbox.id,
            measurement_period_days: MEASUREMENT_PERIOD_DAYS,
            start_date: test_start,
            end_date: now,
            baseline,
            test_period,
            improvements,
            daily_measurements,
            validated,
            validation_reason,
        };

        let transient = result.transient_regressions(self.config.max_reliability_drop_pp).len();
        crate::metrics::observe_stage("measure", started.elapsed().as_secs_f64());
        info!(
            agent_id = %agent_id,
            proposal_id = %proposal.id,
            speed_pct = improvements.speed_improvement_percent,
            cost_pct = improvements.cost_reduction_percent,
            reliability_pp = improvements.reliability_improvement_percentage_points,
            transient_regressions = transient,
            validated,
            "impact measured: {}",
            result.validation_reason
        );
        Ok(result)
    }

    /// Condense a measurement into the durable, scorable record.
    ///
    /// `sandbox_samples` is the number of trial executions the sandbox ran
    /// and feeds the testing-cost term of the ROI.
    pub fn to_impact_metrics(
        &self,
        agent_id: &str,
        proposal: &ImprovementProposal,
        result: &ImpactMeasurementResult,
        sandbox_samples: usize,
    ) -> ImpactMetrics {
        let gain = scoring::weighted_gain(
            result.improvements.speed_improvement_percent,
            result.improvements.cost_reduction_percent,
            result.improvements.reliability_improvement_percentage_points,
        );
        let roi = calculate_roi(
            proposal.kind(),
            &result.baseline,
            &result.test_period,
            sandbox_samples,
            gain,
            &self.roi,
        );
        ImpactMetrics::from_measurement(agent_id, result, roi, self.clock.now())
    }

    async fn period_metrics(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodMetrics, StoreError> {
        let (avg_latency_ms, total_cost, success_rate, total_operations) = tokio::try_join!(
            self.metrics.average_latency_ms(agent_id, start, end),
            self.metrics.total_cost_cents(agent_id, start, end),
            self.metrics.success_rate(agent_id, start, end),
            self.metrics.operation_count(agent_id, start, end),
        )?;
        let avg_cost_cents = if total_operations > 0 {
            total_cost / total_operations as f64
        } else {
            0.0
        };
        debug!(agent_id = %agent_id, %start, %end, ops = total_operations, "period aggregated");
        Ok(PeriodMetrics {
            avg_latency_ms: avg_latency_ms.max(0.0),
            avg_cost_cents: avg_cost_cents.max(0.0),
            success_rate: success_rate.clamp(0.0, 1.0),
            total_operations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::proposal::{ProposedChange, TargetMetric};
    use crate::store::{AgentConfig, InMemoryMetricsStore, OperationSample};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 0, 0, 0).unwrap()
    }

    fn period(latency: f64, cost: f64, success: f64) -> PeriodMetrics {
        PeriodMetrics {
            avg_latency_ms: latency,
            avg_cost_cents: cost,
            success_rate: success,
            total_operations: 100,
        }
    }

    /// 100 samples evenly spread over the 7 days starting at `start`, the
    /// first `successes` of which succeed.
    fn seed(store: &InMemoryMetricsStore, start: DateTime<Utc>, latency: f64, cost: f64, successes: usize) {
        store.record_many((0..100).map(|i| OperationSample {
            agent_id: "agent-1".into(),
            timestamp: start + Duration::minutes(i as i64 * 100),
            latency_ms: latency,
            cost_cents: cost,
            success: i < successes,
        }));
    }

    fn proposal() -> ImprovementProposal {
        ImprovementProposal::new(
            "agent-1",
            "opp-1",
            ProposedChange::ModelSwitch {
                from_model: "slow".into(),
                to_model: "fast".into(),
            },
            "switch model",
            "cheaper and faster",
            TargetMetric::Cost,
            50.0,
            now(),
        )
    }

    fn sandbox_for(p: &ImprovementProposal) -> SandboxEnvironment {
        SandboxEnvironment {
            id: SandboxEnvironment::id_for(&p.id),
            agent_id: p.agent_id.clone(),
            proposal_id: p.id.clone(),
            created_at: now(),
            isolated_state: AgentConfig {
                model_id: "fast".into(),
                tools: vec![],
                parameters: BTreeMap::new(),
                strategy: "react".into(),
            },
            change_applied: true,
        }
    }

    fn measurer(store: &InMemoryMetricsStore) -> ImpactMeasurer {
        ImpactMeasurer::new(
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(now())),
            ImpactConfig::default(),
            RoiConfig::default(),
        )
    }

    #[test]
    fn test_deltas_halved_latency_and_cost() {
        let d = compute_improvements(&period(150.0, 0.5, 0.92), &period(75.0, 0.25, 0.92));
        assert_eq!(d.speed_improvement_percent, 50.0);
        assert_eq!(d.cost_reduction_percent, 50.0);
        assert_eq!(d.reliability_improvement_percentage_points, 0.0);
    }

    #[test]
    fn test_deltas_zero_baseline() {
        let d = compute_improvements(&PeriodMetrics::default(), &period(75.0, 0.25, 0.92));
        assert_eq!(d.speed_improvement_percent, 0.0);
        assert_eq!(d.cost_reduction_percent, 0.0);
    }

    #[test]
    fn test_reliability_veto_beats_gains() {
        let d = compute_improvements(&period(150.0, 0.5, 0.92), &period(10.0, 0.01, 0.80));
        let (ok, reason) = validate_improvements(&d, &ImpactConfig::default());
        assert!(!ok);
        assert!(reason.contains("Reliability degraded"), "{reason}");
    }

    #[test]
    fn test_reliability_drop_at_tolerance_is_not_vetoed() {
        let d = compute_improvements(&period(150.0, 0.5, 0.92), &period(150.0, 0.25, 0.87));
        assert_eq!(d.reliability_improvement_percentage_points, -5.0);
        let (ok, reason) = validate_improvements(&d, &ImpactConfig::default());
        assert!(ok, "{reason}");
        assert!(reason.contains("cost reduced"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let d = ImprovementDeltas {
            speed_improvement_percent: 10.0,
            cost_reduction_percent: 10.0,
            reliability_improvement_percentage_points: 5.0,
        };
        let (ok, reason) = validate_improvements(&d, &ImpactConfig::default());
        assert!(!ok);
        assert!(reason.starts_with("Improvements below threshold"));
    }

    #[test]
    fn test_reason_names_each_passing_metric() {
        let d = ImprovementDeltas {
            speed_improvement_percent: 12.0,
            cost_reduction_percent: 2.0,
            reliability_improvement_percentage_points: 6.0,
        };
        let (ok, reason) = validate_improvements(&d, &ImpactConfig::default());
        assert!(ok);
        assert!(reason.contains("speed improved"));
        assert!(reason.contains("reliability improved"));
        assert!(!reason.contains("cost reduced"));
    }

    #[tokio::test]
    async fn test_measure_validates_halved_cost_and_latency() {
        let store = InMemoryMetricsStore::new();
        seed(&store, now() - Duration::days(14), 150.0, 0.5, 92);
        seed(&store, now() - Duration::days(7), 75.0, 0.25, 92);
        let p = proposal();
        let result = measurer(&store)
            .measure_impact("agent-1", &p, sandbox_for(&p))
            .await
            .unwrap();
        assert_eq!(result.measurement_period_days, 7);
        assert_eq!(result.baseline.avg_latency_ms, 150.0);
        assert_eq!(result.baseline.avg_cost_cents, 0.5);
        assert_eq!(result.improvements.speed_improvement_percent, 50.0);
        assert_eq!(result.improvements.cost_reduction_percent, 50.0);
        assert!(result.validated, "{}", result.validation_reason);
    }

    #[tokio::test]
    async fn test_measure_rejects_reliability_drop() {
        let store = InMemoryMetricsStore::new();
        seed(&store, now() - Duration::days(14), 150.0, 0.5, 92);
        seed(&store, now() - Duration::days(7), 75.0, 0.25, 80);
        let p = proposal();
        let result = measurer(&store)
            .measure_impact("agent-1", &p, sandbox_for(&p))
            .await
            .unwrap();
        assert!(!result.validated);
        assert!(result.validation_reason.contains("Reliability degraded"));
    }

    #[tokio::test]
    async fn test_measure_records_seven_daily_snapshots() {
        let store = InMemoryMetricsStore::new();
        seed(&store, now() - Duration::days(14), 150.0, 0.5, 92);
        seed(&store, now() - Duration::days(7), 75.0, 0.25, 92);
        let p = proposal();
        let result = measurer(&store)
            .measure_impact("agent-1", &p, sandbox_for(&p))
            .await
            .unwrap();
        assert_eq!(result.daily_measurements.len(), 7);
        assert_eq!(result.daily_measurements[0].day, 1);
        assert_eq!(result.daily_measurements[0].date, result.start_date);
        let daily_ops: u64 = result
            .daily_measurements
            .iter()
            .map(|d| d.metrics.total_operations)
            .sum();
        assert_eq!(daily_ops, result.test_period.total_operations);
    }

    #[tokio::test]
    async fn test_measure_empty_store_is_rejected_not_error() {
        let store = InMemoryMetricsStore::new();
        let p = proposal();
        let result = measurer(&store)
            .measure_impact("agent-1", &p, sandbox_for(&p))
            .await
            .unwrap();
        assert!(!result.validated);
        assert_eq!(result.test_period, PeriodMetrics::default());
    }

    #[tokio::test]
    async fn test_measure_rejects_foreign_sandbox() {
        let store = InMemoryMetricsStore::new();
        let p = proposal();
        let other = proposal();
        let err = measurer(&store)
            .measure_impact("agent-1", &p, sandbox_for(&other))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::ProposalMismatch(_)));
    }

    #[tokio::test]
    async fn test_to_impact_metrics_carries_roi() {
        let store = InMemoryMetricsStore::new();
        seed(&store, now() - Duration::days(14), 150.0, 0.5, 92);
        seed(&store, now() - Duration::days(7), 75.0, 0.25, 92);
        let p = proposal();
        let m = measurer(&store);
        let result = m.measure_impact("agent-1", &p, sandbox_for(&p)).await.unwrap();
        let impact = m.to_impact_metrics("agent-1", &p, &result, 10);
        assert_eq!(impact.improvement_id, format!("imp-{}", p.id));
        assert!(impact.is_validated());
        assert_eq!(impact.performance_gain_percent, 50.0);
        assert_eq!(impact.roi.implementation_cost_cents, 200.0);
        assert!((impact.roi.testing_cost_cents - 5.0).abs() < 1e-9);
        assert!(impact.roi.projected_savings_cents > 0.0);
    }
}
