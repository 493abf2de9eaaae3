//! Prometheus metrics for the governance pipeline.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The recording helpers
//! (`record_proposal`, `record_gate_check`, …) are no-ops if `init_metrics`
//! was never called, so governance is always safe to run and observability
//! simply degrades.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `governor_proposals_total` | Counter | `outcome` |
//! | `governor_gate_checks_total` | Counter | `state` |
//! | `governor_approvals_total` | Counter | `status` |
//! | `governor_stage_duration_seconds` | Histogram | `stage` |

use crate::GovernanceError;
use prometheus::{core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::OnceLock;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All governance metrics, stored together in a single [`OnceLock`].
pub struct Metrics {
    /// Registry that owns every descriptor below.
    pub registry: Registry,
    /// Proposals by terminal outcome.
    pub proposals_total: CounterVec,
    /// Gate checks by resulting state.
    pub gate_checks_total: CounterVec,
    /// Approval requests by status transition.
    pub approvals_total: CounterVec,
    /// Per-stage wall time.
    pub stage_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> GovernanceError {
    GovernanceError::Other(format!("metrics init failed: {e}"))
}

impl Metrics {
    fn new(prefix: &str) -> Result<Self, GovernanceError> {
        let registry = Registry::new();

        let proposals_total = CounterVec::new(
            Opts::new(format!("{prefix}_proposals_total"), "Proposals by outcome"),
            &["outcome"],
        )
        .map_err(init_err)?;
        registry.register(Box::new(proposals_total.clone())).map_err(init_err)?;

        let gate_checks_total = CounterVec::new(
            Opts::new(format!("{prefix}_gate_checks_total"), "Gate checks by resulting state"),
            &["state"],
        )
        .map_err(init_err)?;
        registry.register(Box::new(gate_checks_total.clone())).map_err(init_err)?;

        let approvals_total = CounterVec::new(
            Opts::new(format!("{prefix}_approvals_total"), "Approval requests by status"),
            &["status"],
        )
        .map_err(init_err)?;
        registry.register(Box::new(approvals_total.clone())).map_err(init_err)?;

        let stage_duration = HistogramVec::new(
            HistogramOpts::new(format!("{prefix}_stage_duration_seconds"), "Duration per governance stage"),
            &["stage"],
        )
        .map_err(init_err)?;
        registry.register(Box::new(stage_duration.clone())).map_err(init_err)?;

        Ok(Self {
            registry,
            proposals_total,
            gate_checks_total,
            approvals_total,
            stage_duration,
        })
    }
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all metrics against a private registry.
///
/// Calling it a second time is a no-op.
///
/// # Errors
///
/// Returns [`GovernanceError::Other`] if a descriptor cannot be built or
/// registered.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), GovernanceError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = Metrics::new("governor")?;
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn inc(counter: &CounterVec, label: &str) {
    if let Ok(c) = counter.get_metric_with_label_values(&[label]) {
        c.inc();
    }
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count a proposal outcome (`validated`, `rejected`, `blocked`, `applied`,
/// `rolled_back`). No-op before [`init_metrics`].
pub fn record_proposal(outcome: &str) {
    if let Some(m) = metrics() {
        inc(&m.proposals_total, outcome);
    }
}

/// Count a gate check by resulting state. No-op before [`init_metrics`].
pub fn record_gate_check(state: &str) {
    if let Some(m) = metrics() {
        inc(&m.gate_checks_total, state);
    }
}

/// Count an approval status transition. No-op before [`init_metrics`].
pub fn record_approval(status: &str) {
    if let Some(m) = metrics() {
        inc(&m.approvals_total, status);
    }
}

/// Observe the wall time of a governance stage, in seconds.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn observe_stage(stage: &str, secs: f64) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.stage_duration.get_metric_with_label_values(&[stage]) {
            h.observe(secs);
        }
    }
}

/// Encode every metric in the Prometheus text exposition format.
///
/// Returns an empty string before [`init_metrics`] or if encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    encode(&m.registry)
}

fn encode(registry: &Registry) -> String {
    let families = registry.gather();
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Counter values keyed by label, for dashboards and tests.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MetricsSummary {
    /// Proposal counts keyed by outcome.
    pub proposals: HashMap<String, u64>,
    /// Gate check counts keyed by state.
    pub gate_checks: HashMap<String, u64>,
    /// Approval counts keyed by status.
    pub approvals: HashMap<String, u64>,
}

fn collect_counter(counter: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in counter.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            out.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    out
}

fn summarize(m: &Metrics) -> MetricsSummary {
    MetricsSummary {
        proposals: collect_counter(&m.proposals_total, "outcome"),
        gate_checks: collect_counter(&m.gate_checks_total, "state"),
        approvals: collect_counter(&m.approvals_total, "status"),
    }
}

/// Snapshot of the global counters; zeroed before [`init_metrics`].
///
/// # Panics
///
/// This function never panics.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map(summarize).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_helpers_before_init_do_not_panic() {
        record_proposal("applied");
        record_gate_check("warning");
        record_approval("pending");
        observe_stage("measure", 0.01);
    }

    #[test]
    fn test_local_bundle_counts_by_label() {
        // The global bundle is shared across tests; count on a local one.
        let m = Metrics::new("t").unwrap();
        inc(&m.proposals_total, "applied");
        inc(&m.proposals_total, "applied");
        inc(&m.gate_checks_total, "blocked");
        let s = summarize(&m);
        assert_eq!(s.proposals.get("applied"), Some(&2));
        assert_eq!(s.gate_checks.get("blocked"), Some(&1));
        assert!(s.approvals.is_empty());
    }

    #[test]
    fn test_encode_contains_metric_names() {
        let m = Metrics::new("t2").unwrap();
        inc(&m.approvals_total, "approved");
        m.stage_duration
            .get_metric_with_label_values(&["apply"])
            .unwrap()
            .observe(0.5);
        let text = encode(&m.registry);
        assert!(text.contains("t2_approvals_total"));
        assert!(text.contains("t2_stage_duration_seconds"));
    }

    #[test]
    fn test_gather_after_init_exposes_governor_metrics() {
        init_metrics().unwrap();
        record_proposal("validated");
        assert!(gather().contains("governor_proposals_total"));
    }
}
