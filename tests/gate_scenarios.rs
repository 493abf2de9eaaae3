//! Gate and velocity scenarios built from hand-written impact logs.

mod common;

use std::sync::Arc;

use capability_governor::gate::{
    block_improvement_if_exceeds_gate, calculate_safe_improvement_limit, check_capability_gates, ApprovalStatus,
    ViolationSeverity,
};
use capability_governor::store::{
    CollectingNotifier, GovernanceRecord, GovernanceStore, InMemoryGovernanceStore, RecordEnvelope,
};
use capability_governor::velocity::{analyze_velocity_trend, measure_velocity, VelocityConfig};
use capability_governor::{CapabilityGate, GateConfig, GateState, ManualClock, VelocityTracker};
use chrono::Duration;
use common::{impact, t0, AGENT};

fn rapid_log() -> Vec<capability_governor::ImpactMetrics> {
    // 70 + 10.5 capability gain in a 7-day window: 11.5/day.
    vec![
        impact(AGENT, 100.0, 100.0, 0.0, t0() - Duration::days(3)),
        impact(AGENT, 0.0, 35.0, 0.0, t0() - Duration::days(1)),
    ]
}

#[test]
fn test_rapid_growth_warning_tier_blocks() {
    let velocity = measure_velocity(AGENT, &rapid_log(), t0() - Duration::days(7), t0());
    assert_eq!(velocity.capability_gain_per_day, 11.5);

    let trend = analyze_velocity_trend(&velocity, None, &VelocityConfig::default());
    assert!(trend.is_rapid_growth);
    assert!(!trend.is_accelerating);
    assert!(!trend.is_decelerating);

    let result = check_capability_gates(&velocity, &trend, &GateConfig::default());
    assert!(!result.allowed);
    assert_eq!(result.state, GateState::Warning);
    let violation = result.violation.unwrap();
    assert_eq!(violation.severity, ViolationSeverity::Warning);
    assert_eq!(violation.approval_status, Some(ApprovalStatus::Pending));
}

#[test]
fn test_audit_mode_same_inputs_allowed_with_violation() {
    let velocity = measure_velocity(AGENT, &rapid_log(), t0() - Duration::days(7), t0());
    let trend = analyze_velocity_trend(&velocity, None, &VelocityConfig::default());
    let config = GateConfig {
        enforce_gates: false,
        ..GateConfig::default()
    };
    let result = check_capability_gates(&velocity, &trend, &config);
    assert!(result.allowed);
    assert_eq!(result.state, GateState::Warning);
    assert!(result.violation.is_some());
}

#[test]
fn test_other_agents_and_rejected_entries_do_not_count() {
    let mut log = rapid_log();
    log.push(impact("agent-2", 100.0, 100.0, 100.0, t0() - Duration::days(2)));
    let mut rejected = impact(AGENT, 100.0, 0.0, 0.0, t0() - Duration::days(2));
    rejected.validation_status = capability_governor::ValidationStatus::Rejected;
    log.push(rejected);

    let velocity = measure_velocity(AGENT, &log, t0() - Duration::days(7), t0());
    assert_eq!(velocity.capability_gain_per_day, 11.5);
    assert_eq!(velocity.improvements_in_window, 2);
}

#[test]
fn test_pre_commit_projection_and_safe_limit() {
    let log = vec![impact(AGENT, 0.0, 70.0, 0.0, t0() - Duration::days(2))];
    let velocity = measure_velocity(AGENT, &log, t0() - Duration::days(7), t0());
    assert_eq!(velocity.capability_gain_per_day, 3.0);

    let limit = calculate_safe_improvement_limit(&velocity, &GateConfig::default());
    assert_eq!(limit.remaining_budget, 7.0);

    // Fits: 3 + 0.4*10 = 7.
    let small = impact(AGENT, 10.0, 0.0, 0.0, t0());
    assert!(block_improvement_if_exceeds_gate(AGENT, &small, &velocity, &GateConfig::default()).allowed);

    // 3 + 0.3*40 = 15: 50% over, blocked tier.
    let large = impact(AGENT, 0.0, 40.0, 0.0, t0());
    let result = block_improvement_if_exceeds_gate(AGENT, &large, &velocity, &GateConfig::default());
    assert!(!result.allowed);
    assert_eq!(result.state, GateState::Blocked);
    assert_eq!(
        result.violation.unwrap().improvement_id(),
        Some(large.improvement_id.as_str())
    );
}

#[tokio::test]
async fn test_tracker_and_gate_persist_trail() {
    let store = InMemoryGovernanceStore::default();
    for entry in rapid_log() {
        store.seed_impact(entry);
    }
    let notifier = CollectingNotifier::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let tracker = VelocityTracker::new(
        Arc::new(store.clone()),
        Arc::new(notifier.clone()),
        clock.clone(),
        VelocityConfig::default(),
    );
    let gate = CapabilityGate::new(
        Arc::new(store.clone()),
        Arc::new(notifier.clone()),
        clock,
        GateConfig::default(),
    );

    let report = tracker.track_improvement_velocity(AGENT).await.unwrap();
    assert!(report.trend.is_rapid_growth);
    assert!(!store.records_of_type("velocity_alert").is_empty());

    let result = gate.enforce(&report.current, &report.trend).await;
    assert!(!result.allowed);
    assert_eq!(gate.state(AGENT), GateState::Warning);
    assert_eq!(store.records_of_type("gate_violation").len(), 1);
    assert_eq!(store.records_of_type("approval_request").len(), 1);
    assert_eq!(store.records_of_type("gate_alert").len(), 1);

    let request_id = result.approval_request_id.unwrap();
    gate.reject_gate_crossing(&request_id, "safety-review", "growth too fast")
        .await
        .unwrap();
    assert!(gate.approvals().pending(AGENT).is_empty());
    // The resolution is persisted as a second approval record.
    assert_eq!(store.records_of_type("approval_request").len(), 2);
}

#[tokio::test]
async fn test_gate_state_is_recomputed_every_check() {
    let store = InMemoryGovernanceStore::default();
    let clock = Arc::new(ManualClock::new(t0()));
    let gate = CapabilityGate::new(
        Arc::new(store.clone()),
        Arc::new(CollectingNotifier::new()),
        clock,
        GateConfig::default(),
    );

    let hot = measure_velocity(AGENT, &rapid_log(), t0() - Duration::days(7), t0());
    let trend = analyze_velocity_trend(&hot, None, &VelocityConfig::default());
    gate.enforce(&hot, &trend).await;
    assert_eq!(gate.state(AGENT), GateState::Warning);

    let cool = measure_velocity(AGENT, &[], t0(), t0() + Duration::days(7));
    let trend = analyze_velocity_trend(&cool, None, &VelocityConfig::default());
    let result = gate.enforce(&cool, &trend).await;
    assert!(result.allowed);
    assert_eq!(gate.state(AGENT), GateState::WithinGate);
}

#[tokio::test]
async fn test_concurrent_pre_commits_crossing_caught_post_hoc() {
    let store = InMemoryGovernanceStore::default();
    // 21 gain in the window: 3/day, leaving a budget of 7.
    store.seed_impact(impact(AGENT, 0.0, 70.0, 0.0, t0() - Duration::days(2)));
    let notifier = CollectingNotifier::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let tracker = VelocityTracker::new(
        Arc::new(store.clone()),
        Arc::new(notifier.clone()),
        clock.clone(),
        VelocityConfig::default(),
    );
    let gate = CapabilityGate::new(
        Arc::new(store.clone()),
        Arc::new(notifier.clone()),
        clock,
        GateConfig::default(),
    );

    // Every proposal is checked against the same snapshot, as concurrent
    // pipelines would be, and each fits the budget on its own: 3 + 6.5.
    let snapshot = tracker.current_velocity(AGENT).await.unwrap();
    assert_eq!(snapshot.capability_gain_per_day, 3.0);
    let proposals: Vec<_> = (0..10).map(|_| impact(AGENT, 16.25, 0.0, 0.0, t0())).collect();
    for proposed in &proposals {
        let result = gate.pre_commit(AGENT, proposed, &snapshot).await;
        assert!(result.allowed);
        assert!(result.approval_request_id.is_none());
    }

    for (applied, proposed) in proposals.iter().enumerate() {
        store
            .save_record(RecordEnvelope::new(t0(), GovernanceRecord::ImpactMetrics(proposed.clone())))
            .await
            .unwrap();
        if applied == 1 {
            // Two joint applies stay inside: (21 + 13) / 7.
            let report = tracker.track_improvement_velocity(AGENT).await.unwrap();
            assert!(gate.enforce(&report.current, &report.trend).await.allowed);
        }
    }

    // All ten: (21 + 65) / 7 ≈ 12.29/day, 23% over the ceiling.
    let report = tracker.track_improvement_velocity(AGENT).await.unwrap();
    assert!((report.current.capability_gain_per_day - 86.0 / 7.0).abs() < 1e-9);
    let result = gate.enforce(&report.current, &report.trend).await;
    assert!(!result.allowed);
    assert_eq!(result.state, GateState::Blocked);
    let request_id = result.approval_request_id.unwrap();
    let pending = gate.approvals().pending(AGENT);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request_id);
    assert!(pending[0].improvement_id.is_none());
    assert_eq!(gate.state(AGENT), GateState::Blocked);
}
