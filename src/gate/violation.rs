//! Gate states and violation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval::ApprovalStatus;

/// Where an agent currently sits relative to the ceiling.
///
/// Recomputed on every check; never sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Growth at or below the ceiling.
    WithinGate,
    /// Over the ceiling by less than the warning band.
    Warning,
    /// Over the ceiling by the warning band up to the blocked band.
    Blocked,
    /// Over the ceiling by more than the blocked band.
    Critical,
}

impl GateState {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::WithinGate => "within_gate",
            GateState::Warning => "warning",
            GateState::Blocked => "blocked",
            GateState::Critical => "critical",
        }
    }
}

/// How far over the ceiling a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Excess below the warning band.
    Warning,
    /// Excess within `[warning band, blocked band]`.
    Blocked,
    /// Excess above the blocked band.
    Critical,
}

impl ViolationSeverity {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        GateState::from(*self).as_str()
    }
}

impl From<ViolationSeverity> for GateState {
    fn from(s: ViolationSeverity) -> Self {
        match s {
            ViolationSeverity::Warning => GateState::Warning,
            ViolationSeverity::Blocked => GateState::Blocked,
            ViolationSeverity::Critical => GateState::Critical,
        }
    }
}

/// Excess of `growth` over `ceiling` as a fraction of `ceiling`, rounded to
/// 9 decimal places. Non-positive when within the gate.
pub fn excess_ratio(growth: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 {
        return if growth > ceiling { f64::INFINITY } else { 0.0 };
    }
    (((growth - ceiling) / ceiling) * 1e9).round() / 1e9
}

/// Classify `growth` against `ceiling`.
///
/// Returns `None` when `growth ≤ ceiling`. Otherwise the excess ratio picks
/// the tier: `< warning_band` warning, `warning_band..=blocked_band`
/// blocked, `> blocked_band` critical.
///
/// # Panics
/// This function never panics.
pub fn classify_excess(
    growth: f64,
    ceiling: f64,
    warning_band: f64,
    blocked_band: f64,
) -> Option<ViolationSeverity> {
    if growth <= ceiling {
        return None;
    }
    let ratio = excess_ratio(growth, ceiling);
    Some(if ratio < warning_band {
        ViolationSeverity::Warning
    } else if ratio <= blocked_band {
        ViolationSeverity::Blocked
    } else {
        ViolationSeverity::Critical
    })
}

/// Which check produced a violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ViolationSource {
    /// Observed velocity, after improvements were applied.
    PostHoc,
    /// Projected velocity, before a specific improvement is applied.
    PreCommit {
        /// Improvement that would have caused the crossing.
        improvement_id: String,
    },
}

/// A recorded crossing of the growth ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateViolation {
    /// `viol-<uuid>`.
    pub id: String,
    /// Agent that crossed.
    pub agent_id: String,
    /// Observed or projected capability gain per day.
    pub growth_rate: f64,
    /// Ceiling in force.
    pub ceiling: f64,
    /// Excess over the ceiling, in percent of the ceiling.
    pub excess_percent: f64,
    /// Tier.
    pub severity: ViolationSeverity,
    /// Producing check.
    pub source: ViolationSource,
    /// Whether the crossing needs human sign-off.
    pub requires_approval: bool,
    /// Approval state, present exactly when `requires_approval`.
    pub approval_status: Option<ApprovalStatus>,
    /// Whether the violation blocked (`false` in audit-only mode).
    pub enforced: bool,
    /// When it was detected.
    pub detected_at: DateTime<Utc>,
}

impl GateViolation {
    /// Record a crossing. `approval_status` starts `Pending` when approval is
    /// required.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        growth_rate: f64,
        ceiling: f64,
        severity: ViolationSeverity,
        source: ViolationSource,
        requires_approval: bool,
        enforced: bool,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("viol-{}", Uuid::new_v4()),
            agent_id: agent_id.into(),
            growth_rate,
            ceiling,
            excess_percent: excess_ratio(growth_rate, ceiling) * 100.0,
            severity,
            source,
            requires_approval,
            approval_status: requires_approval.then_some(ApprovalStatus::Pending),
            enforced,
            detected_at,
        }
    }

    /// Improvement that caused a pre-commit violation.
    pub fn improvement_id(&self) -> Option<&str> {
        match &self.source {
            ViolationSource::PreCommit { improvement_id } => Some(improvement_id),
            ViolationSource::PostHoc => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_gate_at_ceiling() {
        assert_eq!(classify_excess(10.0, 10.0, 0.2, 0.5), None);
        assert_eq!(classify_excess(3.0, 10.0, 0.2, 0.5), None);
    }

    #[test]
    fn test_fifteen_percent_over_is_warning() {
        assert_eq!(classify_excess(11.5, 10.0, 0.2, 0.5), Some(ViolationSeverity::Warning));
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(classify_excess(12.0, 10.0, 0.2, 0.5), Some(ViolationSeverity::Blocked));
        assert_eq!(classify_excess(15.0, 10.0, 0.2, 0.5), Some(ViolationSeverity::Blocked));
        assert_eq!(classify_excess(15.01, 10.0, 0.2, 0.5), Some(ViolationSeverity::Critical));
    }

    #[test]
    fn test_zero_ceiling_is_critical() {
        assert_eq!(classify_excess(0.1, 0.0, 0.2, 0.5), Some(ViolationSeverity::Critical));
        assert_eq!(classify_excess(0.0, 0.0, 0.2, 0.5), None);
    }

    #[test]
    fn test_violation_pending_only_when_required() {
        let now = Utc::now();
        let v = GateViolation::new("a", 11.5, 10.0, ViolationSeverity::Warning, ViolationSource::PostHoc, true, true, now);
        assert_eq!(v.approval_status, Some(ApprovalStatus::Pending));
        assert!((v.excess_percent - 15.0).abs() < 1e-9);
        let audit = GateViolation::new("a", 11.5, 10.0, ViolationSeverity::Warning, ViolationSource::PostHoc, false, false, now);
        assert!(audit.approval_status.is_none());
    }

    #[test]
    fn test_source_serializes_with_tag() {
        let src = ViolationSource::PreCommit {
            improvement_id: "imp-1".into(),
        };
        let json = serde_json::to_value(&src).unwrap();
        assert_eq!(json["check"], "pre_commit");
        assert_eq!(json["improvement_id"], "imp-1");
    }
}
