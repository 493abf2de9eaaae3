//! # Capability Gate
//!
//! The policy enforcement point for self-improvement velocity.
//!
//! Every improvement is checked twice:
//! 1. **Pre-commit**: project the current rate plus the improvement's gain
//!    and block before anything is applied if the projection crosses the
//!    ceiling. This is the primary defense.
//! 2. **Post-hoc**: check the observed rate after improvements land. This is
//!    the safety net for concurrent proposals that each passed pre-commit
//!    but jointly crossed the ceiling.
//!
//! Per-agent state moves between within-gate, warning, blocked and critical
//! on every check and is never sticky.
//!
//! ## Modes
//! - `enforce_gates = false`: audit only. Violations are recorded, nothing is
//!   blocked.
//! - `require_human_approval = true`: every enforced violation opens an
//!   [`ApprovalRequest`]; an approval grants a one-time exception.

pub mod approval;
pub mod violation;

use std::sync::Arc;

use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use approval::{ApprovalError, ApprovalRequest, ApprovalStatus, ApprovalWorkflow};
pub use violation::{
    classify_excess, excess_ratio, GateState, GateViolation, ViolationSeverity, ViolationSource,
};

use crate::alert::{Alert, AlertKind, AlertSeverity, Notifier};
use crate::clock::SharedClock;
use crate::impact::ImpactMetrics;
use crate::scoring::{self, COST_WEIGHT, PERFORMANCE_WEIGHT, RELIABILITY_WEIGHT};
use crate::store::{GovernanceRecord, GovernanceStore, RecordEnvelope};
use crate::velocity::{VelocityMeasurement, VelocityTrend};

// ─── Configuration ────────────────────────────────────────────────────────────

fn default_ceiling() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_warning_band() -> f64 {
    0.2
}

fn default_blocked_band() -> f64 {
    0.5
}

fn default_max_tracked_approvals() -> usize {
    1_000
}

/// Gate policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GateConfig {
    /// Ceiling on capability gain per day.
    #[serde(default = "default_ceiling")]
    pub max_capability_gain_per_day: f64,
    /// Block on violation; `false` records only.
    #[serde(default = "default_true")]
    pub enforce_gates: bool,
    /// Open an approval request for every enforced violation.
    #[serde(default = "default_true")]
    pub require_human_approval: bool,
    /// Excess ratio (of the ceiling) where warning turns into blocked.
    #[serde(default = "default_warning_band")]
    pub warning_band: f64,
    /// Excess ratio (of the ceiling) above which blocked turns into critical.
    #[serde(default = "default_blocked_band")]
    pub blocked_band: f64,
    /// Approval requests held in memory before the oldest settled ones are
    /// evicted. Evicted requests remain in the governance store.
    #[serde(default = "default_max_tracked_approvals")]
    pub max_tracked_approvals: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_capability_gain_per_day: default_ceiling(),
            enforce_gates: true,
            require_human_approval: true,
            warning_band: default_warning_band(),
            blocked_band: default_blocked_band(),
            max_tracked_approvals: default_max_tracked_approvals(),
        }
    }
}

// ─── Results ──────────────────────────────────────────────────────────────────

/// Outcome of a gate check. Blocking is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEnforcementResult {
    /// Whether the caller may proceed.
    pub allowed: bool,
    /// State computed by this check.
    pub state: GateState,
    /// Human-readable explanation.
    pub reason: String,
    /// Present whenever the ceiling was crossed, enforced or not.
    pub violation: Option<GateViolation>,
    /// Approval request opened for the violation, if any.
    pub approval_request_id: Option<String>,
    /// Suggested follow-ups.
    pub recommendations: Vec<String>,
}

/// Remaining daily budget and the per-category maximum a single proposal may
/// claim without crossing the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafeImprovementLimit {
    /// Observed capability gain per day.
    pub current_rate: f64,
    /// Ceiling in force.
    pub ceiling: f64,
    /// `max(0, ceiling − current_rate)`.
    pub remaining_budget: f64,
    /// Largest speed gain (percent) that fits the budget on its own.
    pub max_performance_gain_percent: f64,
    /// Largest cost reduction (percent) that fits the budget on its own.
    pub max_cost_reduction_percent: f64,
    /// Largest success-rate increase (pp) that fits the budget on its own.
    pub max_reliability_increase_pp: f64,
}

// ─── Pure checks ──────────────────────────────────────────────────────────────

/// Post-hoc check of an observed velocity against the ceiling.
///
/// # Panics
/// This function never panics.
pub fn check_capability_gates(
    velocity: &VelocityMeasurement,
    trend: &VelocityTrend,
    config: &GateConfig,
) -> GateEnforcementResult {
    let mut result = evaluate(
        &velocity.agent_id,
        velocity.capability_gain_per_day,
        ViolationSource::PostHoc,
        velocity.measured_at,
        config,
    );
    if trend.is_accelerating {
        result.recommendations.push(format!(
            "Growth accelerated {:+.1}% over the previous window; check proposals against calculate_safe_improvement_limit",
            trend.acceleration_percent
        ));
    }
    result
}

/// Pre-commit check: would applying `proposed` push `agent_id` over the
/// ceiling?
///
/// The projection is `current_velocity.capability_gain_per_day +
/// capability_gain(proposed)`.
///
/// # Panics
/// This function never panics.
pub fn block_improvement_if_exceeds_gate(
    agent_id: &str,
    proposed: &ImpactMetrics,
    current_velocity: &VelocityMeasurement,
    config: &GateConfig,
) -> GateEnforcementResult {
    let projected = current_velocity.capability_gain_per_day + scoring::capability_gain(proposed);
    let mut result = evaluate(
        agent_id,
        projected,
        ViolationSource::PreCommit {
            improvement_id: proposed.improvement_id.clone(),
        },
        proposed.measured_at,
        config,
    );
    if result.violation.is_some() {
        let limit = calculate_safe_improvement_limit(current_velocity, config);
        result.recommendations.push(format!(
            "Remaining budget is {:.2}%/day: at most {:.1}% speed, {:.1}% cost or {:.1} pp reliability",
            limit.remaining_budget,
            limit.max_performance_gain_percent,
            limit.max_cost_reduction_percent,
            limit.max_reliability_increase_pp
        ));
    }
    result
}

/// Remaining daily budget, back-solved into per-category maxima through the
/// inverse of the scoring weights.
///
/// # Panics
/// This function never panics.
pub fn calculate_safe_improvement_limit(
    current_velocity: &VelocityMeasurement,
    config: &GateConfig,
) -> SafeImprovementLimit {
    let ceiling = config.max_capability_gain_per_day;
    let remaining = (ceiling - current_velocity.capability_gain_per_day).max(0.0);
    SafeImprovementLimit {
        current_rate: current_velocity.capability_gain_per_day,
        ceiling,
        remaining_budget: remaining,
        max_performance_gain_percent: remaining / PERFORMANCE_WEIGHT,
        max_cost_reduction_percent: remaining / COST_WEIGHT,
        max_reliability_increase_pp: remaining / RELIABILITY_WEIGHT,
    }
}

fn evaluate(
    agent_id: &str,
    rate: f64,
    source: ViolationSource,
    detected_at: chrono::DateTime<chrono::Utc>,
    config: &GateConfig,
) -> GateEnforcementResult {
    let ceiling = config.max_capability_gain_per_day;
    let label = match source {
        ViolationSource::PostHoc => "Capability growth",
        ViolationSource::PreCommit { .. } => "Projected capability growth",
    };

    let Some(severity) = classify_excess(rate, ceiling, config.warning_band, config.blocked_band) else {
        return GateEnforcementResult {
            allowed: true,
            state: GateState::WithinGate,
            reason: format!("{label} {rate:.2}%/day is within the {ceiling:.2}%/day ceiling"),
            violation: None,
            approval_request_id: None,
            recommendations: Vec::new(),
        };
    };

    let enforced = config.enforce_gates;
    let requires_approval = enforced && config.require_human_approval;
    let violation = GateViolation::new(
        agent_id,
        rate,
        ceiling,
        severity,
        source,
        requires_approval,
        enforced,
        detected_at,
    );

    let mut recommendations = vec![match severity {
        ViolationSeverity::Warning => "Pause new proposals until velocity falls back under the ceiling".to_string(),
        ViolationSeverity::Blocked => "Hold further improvements for human review".to_string(),
        ViolationSeverity::Critical => "Review the most recent improvements for rollback".to_string(),
    }];
    if requires_approval {
        recommendations.push("Approve or reject the gate crossing before retrying".to_string());
    }

    let reason = format!(
        "{label} {rate:.2}%/day exceeds the {ceiling:.2}%/day ceiling by {:.1}% ({}){}",
        violation.excess_percent,
        severity.as_str(),
        if enforced { "" } else { "; audit only, not enforced" }
    );

    GateEnforcementResult {
        allowed: !enforced,
        state: severity.into(),
        reason,
        violation: Some(violation),
        approval_request_id: None,
        recommendations,
    }
}

// ─── Service ──────────────────────────────────────────────────────────────────

/// Stateful gate: wraps the pure checks with per-agent state, persistence of
/// violations and approval requests, alerting and the approval workflow.
#[derive(Clone)]
pub struct CapabilityGate {
    store: Arc<dyn GovernanceStore>,
    notifier: Arc<dyn Notifier>,
    approvals: ApprovalWorkflow,
    states: Arc<DashMap<String, GateState>>,
    clock: SharedClock,
    config: GateConfig,
}

impl CapabilityGate {
    /// Create a gate.
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
        config: GateConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            approvals: ApprovalWorkflow::with_capacity(config.max_tracked_approvals),
            states: Arc::new(DashMap::new()),
            clock,
            config,
        }
    }

    /// Active policy.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The approval workflow backing this gate.
    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    /// State computed by the last check for `agent_id`.
    pub fn state(&self, agent_id: &str) -> GateState {
        self.states
            .get(agent_id)
            .map(|s| *s)
            .unwrap_or(GateState::WithinGate)
    }

    /// Post-hoc enforcement of an observed velocity.
    pub async fn enforce(&self, velocity: &VelocityMeasurement, trend: &VelocityTrend) -> GateEnforcementResult {
        let mut result = check_capability_gates(velocity, trend, &self.config);
        self.finish(&velocity.agent_id, &mut result, AlertKind::GateViolation).await;
        result
    }

    /// Pre-commit enforcement for one improvement.
    ///
    /// An approved, unconsumed request covering this improvement lets it
    /// through once.
    pub async fn pre_commit(
        &self,
        agent_id: &str,
        proposed: &ImpactMetrics,
        current_velocity: &VelocityMeasurement,
    ) -> GateEnforcementResult {
        let mut result = block_improvement_if_exceeds_gate(agent_id, proposed, current_velocity, &self.config);

        if !result.allowed {
            if let Some(exception) = self.approvals.consume_exception(agent_id, &proposed.improvement_id) {
                if let Some(v) = result.violation.as_mut() {
                    v.approval_status = Some(exception.status.clone());
                    v.requires_approval = false;
                }
                result.allowed = true;
                result.reason = format!("{}; allowed once by approval '{}'", result.reason, exception.id);
                result.recommendations.clear();
            }
        }

        self.finish(agent_id, &mut result, AlertKind::ImprovementBlocked).await;
        result
    }

    /// Approve a pending request and persist the resolution.
    ///
    /// # Errors
    /// See [`ApprovalWorkflow::approve_gate_crossing`].
    pub async fn approve_gate_crossing(
        &self,
        request_id: &str,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let request = self
            .approvals
            .approve_gate_crossing(request_id, reviewer, notes, self.clock.now())?;
        self.persist(GovernanceRecord::ApprovalRequest(request.clone())).await;
        Ok(request)
    }

    /// Reject a pending request and persist the resolution.
    ///
    /// # Errors
    /// See [`ApprovalWorkflow::reject_gate_crossing`].
    pub async fn reject_gate_crossing(
        &self,
        request_id: &str,
        reviewer: &str,
        reason: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let request = self
            .approvals
            .reject_gate_crossing(request_id, reviewer, reason, self.clock.now())?;
        self.persist(GovernanceRecord::ApprovalRequest(request.clone())).await;
        Ok(request)
    }

    async fn finish(&self, agent_id: &str, result: &mut GateEnforcementResult, blocked_kind: AlertKind) {
        self.states.insert(agent_id.to_string(), result.state);
        crate::metrics::record_gate_check(result.state.as_str());

        let Some(violation) = result.violation.clone() else {
            return;
        };

        self.persist(GovernanceRecord::GateViolation(violation.clone())).await;

        if violation.approval_status == Some(ApprovalStatus::Pending) {
            let request = self.approvals.create_approval_request(&violation, self.clock.now());
            result.approval_request_id = Some(request.id.clone());
            self.persist(GovernanceRecord::ApprovalRequest(request)).await;
        }

        let kind = if result.allowed { AlertKind::GateViolation } else { blocked_kind };
        let severity = match violation.severity {
            ViolationSeverity::Warning | ViolationSeverity::Blocked => AlertSeverity::Warning,
            ViolationSeverity::Critical => AlertSeverity::Critical,
        };
        let alert = Alert::new(
            agent_id,
            kind,
            severity,
            result.reason.clone(),
            violation.growth_rate,
            violation.ceiling,
            None,
            self.clock.now(),
        );
        self.persist(GovernanceRecord::GateAlert(alert.clone())).await;
        self.notifier.notify(&alert).await;

        info!(
            agent_id = %agent_id,
            rate = violation.growth_rate,
            ceiling = violation.ceiling,
            state = result.state.as_str(),
            allowed = result.allowed,
            approval_request = ?result.approval_request_id,
            "gate violation recorded"
        );
    }

    async fn persist(&self, record: GovernanceRecord) {
        let record_type = record.record_type();
        let envelope = RecordEnvelope::new(self.clock.now(), record);
        if let Err(e) = self.store.save_record(envelope).await {
            warn!(record_type, error = %e, "failed to persist gate record");
        }
    }
}
