//! # Governance Pipeline
//!
//! Drives one proposal through every governance stage.
//!
//! ## Data flow
//!
//! ```text
//! Proposal ──► SandboxRunner ──► ImpactMeasurer ──► CapabilityGate (pre-commit)
//!                                     │                      │
//!                                 rejected              blocked │ allowed
//!                                                               ▼
//!              CapabilityGate (post-hoc) ◄── VelocityTracker ◄── ProductionApplier
//! ```
//!
//! ## Guarantees
//! - Production is written only after a validated measurement *and* an
//!   allowing pre-commit check.
//! - Rejected measurements land in the impact log at once. Validated ones
//!   land there only once applied, so a pre-commit block leaves no entry
//!   until [`GovernancePipeline::apply_validated`] succeeds.
//! - A proposal cannot be in flight twice; the second caller gets
//!   [`GovernanceError::ProposalInFlight`].
//!
//! ## NOT Responsible For
//! - Scheduling: callers decide when to run proposals.
//! - Cross-proposal serialization. Two proposals for the same agent may
//!   each pass pre-commit and jointly cross the ceiling; the post-hoc check
//!   catches that.

use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::alert::Notifier;
use crate::applier::{ApplyOutcome, ProductionApplier, RollbackPlan};
use crate::clock::SharedClock;
use crate::config::GovernorConfig;
use crate::gate::{CapabilityGate, GateEnforcementResult};
use crate::impact::{ImpactMeasurementResult, ImpactMeasurer, ImpactMetrics};
use crate::proposal::{AppliedChange, ImprovementProposal, ProposalStatus};
use crate::sandbox::{SandboxExecutor, SandboxRunResult, SandboxRunner};
use crate::store::{AgentRegistry, GovernanceRecord, GovernanceStore, MetricsStore, ProductionState, RecordEnvelope};
use crate::velocity::{VelocityReport, VelocityTracker};
use crate::GovernanceError;

// ─── Wiring ───────────────────────────────────────────────────────────────────

/// External collaborators the pipeline runs against.
///
/// `registry` and `production` usually point at the same backend; they are
/// separate handles so the sandbox never holds the write path.
#[derive(Clone)]
pub struct PipelineBackends {
    /// Operation telemetry.
    pub metrics: Arc<dyn MetricsStore>,
    /// Read-only agent lookup.
    pub registry: Arc<dyn AgentRegistry>,
    /// Production configuration writes.
    pub production: Arc<dyn ProductionState>,
    /// Sample runner for sandbox trials.
    pub executor: Arc<dyn SandboxExecutor>,
    /// Governance records and the impact log.
    pub store: Arc<dyn GovernanceStore>,
    /// Alert sink.
    pub notifier: Arc<dyn Notifier>,
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

/// Where a proposal stopped.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Measurement did not validate the change. Proposal is `rejected`.
    Rejected,
    /// The pre-commit gate refused the change. Proposal stays `validated`
    /// and can be retried with [`GovernancePipeline::apply_validated`] once
    /// the approval request is resolved.
    Blocked {
        /// The refusing decision, including any approval request id.
        gate: GateEnforcementResult,
    },
    /// The change is live. Proposal is `applied`.
    Applied {
        /// What was written and how to undo it.
        apply: ApplyOutcome,
        /// Velocity after the change landed.
        velocity: VelocityReport,
        /// Post-hoc gate decision on that velocity.
        post_check: GateEnforcementResult,
    },
}

impl PipelineOutcome {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineOutcome::Rejected => "rejected",
            PipelineOutcome::Blocked { .. } => "blocked",
            PipelineOutcome::Applied { .. } => "applied",
        }
    }
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Sandbox trial summary.
    pub sandbox: SandboxRunResult,
    /// Baseline-vs-test measurement.
    pub measurement: ImpactMeasurementResult,
    /// Durable record appended to the impact log.
    pub impact: ImpactMetrics,
    /// Where the proposal stopped.
    pub outcome: PipelineOutcome,
}

// ─── In-flight guard ──────────────────────────────────────────────────────────

struct InFlight {
    proposals: Arc<DashMap<String, ()>>,
    proposal_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.proposals.remove(&self.proposal_id);
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

/// End-to-end governance for improvement proposals.
#[derive(Clone)]
pub struct GovernancePipeline {
    sandbox: SandboxRunner,
    measurer: ImpactMeasurer,
    applier: ProductionApplier,
    tracker: VelocityTracker,
    gate: CapabilityGate,
    store: Arc<dyn GovernanceStore>,
    clock: SharedClock,
    config: GovernorConfig,
    in_flight: Arc<DashMap<String, ()>>,
}

impl GovernancePipeline {
    /// Build every stage from `backends` and `config`.
    pub fn new(backends: PipelineBackends, clock: SharedClock, config: GovernorConfig) -> Self {
        let PipelineBackends {
            metrics,
            registry,
            production,
            executor,
            store,
            notifier,
        } = backends;
        Self {
            sandbox: SandboxRunner::new(registry, executor, clock.clone(), config.sandbox.clone()),
            measurer: ImpactMeasurer::new(metrics, clock.clone(), config.impact.clone(), config.roi.clone()),
            applier: ProductionApplier::new(production, clock.clone()),
            tracker: VelocityTracker::new(store.clone(), notifier.clone(), clock.clone(), config.velocity.clone())
                .with_severity_bands(config.gate.warning_band, config.gate.blocked_band),
            gate: CapabilityGate::new(store.clone(), notifier, clock.clone(), config.gate.clone()),
            store,
            clock,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Policy the stages were built with.
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// The capability gate, for approvals and state queries.
    pub fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    /// The velocity tracker.
    pub fn tracker(&self) -> &VelocityTracker {
        &self.tracker
    }

    /// Run `proposal` from `proposed` to a terminal pipeline outcome.
    ///
    /// # Errors
    /// - [`GovernanceError::ProposalInFlight`] if the proposal is already
    ///   running.
    /// - [`GovernanceError::Proposal`] if the proposal is not `proposed`.
    /// - [`GovernanceError::SandboxAborted`] when `sandbox.abort_on_errors`
    ///   is set and the trial recorded errors.
    /// - Any error from sandbox creation, measurement, apply or storage.
    pub async fn run(
        &self,
        agent_id: &str,
        proposal: &mut ImprovementProposal,
    ) -> Result<PipelineReport, GovernanceError> {
        let _guard = self.claim(&proposal.id)?;
        let started = Instant::now();

        // Agent lookup failures leave the proposal in `proposed`.
        let mut sandbox = self.sandbox.create_sandbox(agent_id, proposal).await?;
        proposal.transition_to(ProposalStatus::Testing)?;
        let run = self
            .sandbox
            .run_in_sandbox(proposal, &mut sandbox, self.config.sandbox.default_sample_size)
            .await;
        if self.config.sandbox.abort_on_errors && !run.errors.is_empty() {
            proposal.transition_to(ProposalStatus::Rejected)?;
            crate::metrics::record_proposal("rejected");
            return Err(GovernanceError::SandboxAborted {
                proposal_id: proposal.id.clone(),
                errors: run.errors.len(),
            });
        }
        if !run.errors.is_empty() {
            warn!(
                agent_id = %agent_id,
                proposal_id = %proposal.id,
                errors = run.errors.len(),
                "sandbox recorded errors, continuing to measurement"
            );
        }

        let measurement = self.measurer.measure_impact(agent_id, proposal, sandbox).await?;
        let impact = self
            .measurer
            .to_impact_metrics(agent_id, proposal, &measurement, run.samples_executed);

        if !measurement.validated {
            proposal.transition_to(ProposalStatus::Rejected)?;
            self.save_impact(&impact).await?;
            crate::metrics::record_proposal("rejected");
            crate::metrics::observe_stage("pipeline", started.elapsed().as_secs_f64());
            info!(
                agent_id = %agent_id,
                proposal_id = %proposal.id,
                reason = %measurement.validation_reason,
                "proposal rejected by measurement"
            );
            return Ok(PipelineReport {
                sandbox: run,
                measurement,
                impact,
                outcome: PipelineOutcome::Rejected,
            });
        }

        proposal.transition_to(ProposalStatus::Validated)?;
        crate::metrics::record_proposal("validated");

        let outcome = self.commit(agent_id, proposal, &measurement, &impact).await?;
        crate::metrics::observe_stage("pipeline", started.elapsed().as_secs_f64());
        Ok(PipelineReport {
            sandbox: run,
            measurement,
            impact,
            outcome,
        })
    }

    /// Retry the commit half of the pipeline for a proposal left `validated`
    /// by a blocked run, typically after its approval request was approved.
    ///
    /// # Errors
    /// As for [`GovernancePipeline::run`], plus
    /// [`GovernanceError::NotValidated`] if `measurement` did not validate.
    pub async fn apply_validated(
        &self,
        agent_id: &str,
        proposal: &mut ImprovementProposal,
        measurement: &ImpactMeasurementResult,
        impact: &ImpactMetrics,
    ) -> Result<PipelineOutcome, GovernanceError> {
        let _guard = self.claim(&proposal.id)?;
        if !measurement.validated {
            return Err(GovernanceError::NotValidated(proposal.id.clone()));
        }
        if impact.proposal_id != proposal.id || measurement.proposal_id != proposal.id {
            return Err(GovernanceError::ProposalMismatch(format!(
                "impact '{}' does not belong to proposal '{}'",
                impact.improvement_id, proposal.id
            )));
        }
        self.commit(agent_id, proposal, measurement, impact).await
    }

    /// Undo an applied proposal, returning the field-level reversals made.
    ///
    /// # Errors
    /// See [`ProductionApplier::rollback`].
    pub async fn rollback(
        &self,
        plan: &RollbackPlan,
        proposal: &mut ImprovementProposal,
    ) -> Result<Vec<AppliedChange>, GovernanceError> {
        let _guard = self.claim(&proposal.id)?;
        self.applier.rollback(plan, proposal).await
    }

    async fn commit(
        &self,
        agent_id: &str,
        proposal: &mut ImprovementProposal,
        measurement: &ImpactMeasurementResult,
        impact: &ImpactMetrics,
    ) -> Result<PipelineOutcome, GovernanceError> {
        let velocity = self.tracker.current_velocity(agent_id).await?;
        let gate = self.gate.pre_commit(agent_id, impact, &velocity).await;
        if !gate.allowed {
            crate::metrics::record_proposal("blocked");
            info!(
                agent_id = %agent_id,
                proposal_id = %proposal.id,
                state = gate.state.as_str(),
                approval_request_id = ?gate.approval_request_id,
                "proposal blocked by pre-commit gate"
            );
            return Ok(PipelineOutcome::Blocked { gate });
        }

        let apply = self.applier.apply_to_production(agent_id, proposal, measurement).await?;
        if let Err(e) = self.save_impact(impact).await {
            warn!(
                agent_id = %agent_id,
                proposal_id = %proposal.id,
                rollback_steps = apply.rollback_plan.steps.len(),
                error = %e,
                "applied improvement missing from impact log"
            );
            return Err(e);
        }

        let velocity = self.tracker.track_improvement_velocity(agent_id).await?;
        let post_check = self.gate.enforce(&velocity.current, &velocity.trend).await;
        if !post_check.allowed {
            warn!(
                agent_id = %agent_id,
                rate = velocity.current.capability_gain_per_day,
                ceiling = self.config.gate.max_capability_gain_per_day,
                "post-hoc gate check failed after apply"
            );
        }
        Ok(PipelineOutcome::Applied {
            apply,
            velocity,
            post_check,
        })
    }

    async fn save_impact(&self, impact: &ImpactMetrics) -> Result<(), GovernanceError> {
        let envelope = RecordEnvelope::new(self.clock.now(), GovernanceRecord::ImpactMetrics(impact.clone()));
        self.store.save_record(envelope).await?;
        Ok(())
    }

    fn claim(&self, proposal_id: &str) -> Result<InFlight, GovernanceError> {
        match self.in_flight.entry(proposal_id.to_string()) {
            Entry::Occupied(_) => return Err(GovernanceError::ProposalInFlight(proposal_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        Ok(InFlight {
            proposals: self.in_flight.clone(),
            proposal_id: proposal_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::proposal::{ProposedChange, TargetMetric};
    use crate::sandbox::SampleOutcome;
    use crate::store::{
        AgentConfig, AgentRecord, CollectingNotifier, InMemoryAgentRegistry, InMemoryGovernanceStore,
        InMemoryMetricsStore, OperationSample,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    struct SteadyExecutor;

    #[async_trait]
    impl SandboxExecutor for SteadyExecutor {
        async fn execute_sample(
            &self,
            _sandbox_id: &str,
            _state: &AgentConfig,
            _sample_index: usize,
        ) -> Result<SampleOutcome, String> {
            Ok(SampleOutcome {
                latency_ms: 90.0,
                cost_cents: 0.9,
                success: true,
            })
        }
    }

    struct BrokenExecutor;

    #[async_trait]
    impl SandboxExecutor for BrokenExecutor {
        async fn execute_sample(
            &self,
            _sandbox_id: &str,
            _state: &AgentConfig,
            _sample_index: usize,
        ) -> Result<SampleOutcome, String> {
            Err("runtime unavailable".into())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
    }

    struct Harness {
        pipeline: GovernancePipeline,
        registry: InMemoryAgentRegistry,
        store: InMemoryGovernanceStore,
    }

    /// Baseline week at 100ms / 1.0c, test week at `latency` / `cost`, all
    /// operations successful.
    fn harness(latency: f64, cost: f64, config: GovernorConfig, executor: Arc<dyn SandboxExecutor>) -> Harness {
        let metrics = InMemoryMetricsStore::new();
        let baseline_start = now() - Duration::days(14);
        let test_start = now() - Duration::days(7);
        for (start, lat, c) in [(baseline_start, 100.0, 1.0), (test_start, latency, cost)] {
            metrics.record_many((0..70).map(|i| OperationSample {
                agent_id: "agent-1".into(),
                timestamp: start + Duration::hours(i as i64 * 2),
                latency_ms: lat,
                cost_cents: c,
                success: true,
            }));
        }
        let registry = InMemoryAgentRegistry::new();
        registry.insert(AgentRecord {
            id: "agent-1".into(),
            name: "planner".into(),
            active: true,
            config: AgentConfig {
                model_id: "big".into(),
                tools: vec!["search".into()],
                parameters: BTreeMap::new(),
                strategy: "react".into(),
            },
        });
        let store = InMemoryGovernanceStore::default();
        let backends = PipelineBackends {
            metrics: Arc::new(metrics),
            registry: Arc::new(registry.clone()),
            production: Arc::new(registry.clone()),
            executor,
            store: Arc::new(store.clone()),
            notifier: Arc::new(CollectingNotifier::new()),
        };
        let pipeline = GovernancePipeline::new(backends, Arc::new(ManualClock::new(now())), config);
        Harness {
            pipeline,
            registry,
            store,
        }
    }

    fn proposal() -> ImprovementProposal {
        ImprovementProposal::new(
            "agent-1",
            "opp-1",
            ProposedChange::ModelSwitch {
                from_model: "big".into(),
                to_model: "small".into(),
            },
            "smaller model",
            "cheaper at equal quality",
            TargetMetric::Cost,
            12.0,
            now(),
        )
    }

    #[tokio::test]
    async fn test_small_validated_change_is_applied() {
        // 5% faster, 12% cheaper: gain 0.4*5 + 0.3*12 = 5.6 < ceiling.
        let h = harness(95.0, 0.88, GovernorConfig::default(), Arc::new(SteadyExecutor));
        let mut p = proposal();
        let report = h.pipeline.run("agent-1", &mut p).await.unwrap();
        assert_eq!(report.outcome.as_str(), "applied");
        assert_eq!(p.status, ProposalStatus::Applied);
        assert_eq!(h.registry.agent("agent-1").unwrap().config.model_id, "small");
        assert_eq!(h.registry.write_count(), 1);
        assert_eq!(h.store.records_of_type("impact_metrics").len(), 1);
        match report.outcome {
            PipelineOutcome::Applied { post_check, velocity, .. } => {
                assert!(post_check.allowed);
                assert_eq!(velocity.current.improvements_in_window, 1);
            }
            other => panic!("expected applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unvalidated_change_never_reaches_production() {
        // 2% faster, 2% cheaper: below every threshold.
        let h = harness(98.0, 0.98, GovernorConfig::default(), Arc::new(SteadyExecutor));
        let mut p = proposal();
        let report = h.pipeline.run("agent-1", &mut p).await.unwrap();
        assert!(matches!(report.outcome, PipelineOutcome::Rejected));
        assert_eq!(p.status, ProposalStatus::Rejected);
        assert_eq!(h.registry.write_count(), 0);
        assert!(!report.impact.is_validated());
        assert_eq!(h.store.records_of_type("impact_metrics").len(), 1);
    }

    #[tokio::test]
    async fn test_large_gain_is_blocked_before_commit() {
        // 50% faster, 50% cheaper: gain 35 against a ceiling of 10.
        let h = harness(50.0, 0.5, GovernorConfig::default(), Arc::new(SteadyExecutor));
        let mut p = proposal();
        let report = h.pipeline.run("agent-1", &mut p).await.unwrap();
        match &report.outcome {
            PipelineOutcome::Blocked { gate } => {
                assert!(!gate.allowed);
                assert!(gate.approval_request_id.is_some());
            }
            other => panic!("expected blocked, got {other:?}"),
        }
        assert_eq!(p.status, ProposalStatus::Validated);
        assert_eq!(h.registry.write_count(), 0);
        assert!(h.store.records_of_type("impact_metrics").is_empty());
    }

    #[tokio::test]
    async fn test_approved_block_applies_once() {
        let h = harness(50.0, 0.5, GovernorConfig::default(), Arc::new(SteadyExecutor));
        let mut p = proposal();
        let report = h.pipeline.run("agent-1", &mut p).await.unwrap();
        let PipelineOutcome::Blocked { gate } = &report.outcome else {
            panic!("expected blocked");
        };
        let request_id = gate.approval_request_id.clone().unwrap();
        h.pipeline
            .gate()
            .approve_gate_crossing(&request_id, "reviewer", None)
            .await
            .unwrap();

        let outcome = h
            .pipeline
            .apply_validated("agent-1", &mut p, &report.measurement, &report.impact)
            .await
            .unwrap();
        assert_eq!(outcome.as_str(), "applied");
        assert_eq!(p.status, ProposalStatus::Applied);
        assert_eq!(h.registry.write_count(), 1);
    }

    #[tokio::test]
    async fn test_abort_on_errors() {
        let mut cfg = GovernorConfig::default();
        cfg.sandbox.abort_on_errors = true;
        let h = harness(95.0, 0.88, cfg, Arc::new(BrokenExecutor));
        let mut p = proposal();
        let err = h.pipeline.run("agent-1", &mut p).await.unwrap_err();
        assert!(matches!(err, GovernanceError::SandboxAborted { .. }));
        assert_eq!(p.status, ProposalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_sandbox_errors_are_not_fatal_by_default() {
        let h = harness(95.0, 0.88, GovernorConfig::default(), Arc::new(BrokenExecutor));
        let mut p = proposal();
        let report = h.pipeline.run("agent-1", &mut p).await.unwrap();
        assert!(!report.sandbox.errors.is_empty());
        assert_eq!(report.outcome.as_str(), "applied");
    }

    #[tokio::test]
    async fn test_second_claim_is_refused() {
        let h = harness(95.0, 0.88, GovernorConfig::default(), Arc::new(SteadyExecutor));
        let guard = h.pipeline.claim("prop-x").unwrap();
        assert!(matches!(
            h.pipeline.claim("prop-x"),
            Err(GovernanceError::ProposalInFlight(_))
        ));
        drop(guard);
        assert!(h.pipeline.claim("prop-x").is_ok());
    }

    #[tokio::test]
    async fn test_rerun_of_finished_proposal_is_refused() {
        let h = harness(95.0, 0.88, GovernorConfig::default(), Arc::new(SteadyExecutor));
        let mut p = proposal();
        h.pipeline.run("agent-1", &mut p).await.unwrap();
        let err = h.pipeline.run("agent-1", &mut p).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Proposal(_)));
    }

    #[tokio::test]
    async fn test_rollback_restores_model() {
        let h = harness(95.0, 0.88, GovernorConfig::default(), Arc::new(SteadyExecutor));
        let mut p = proposal();
        let report = h.pipeline.run("agent-1", &mut p).await.unwrap();
        let PipelineOutcome::Applied { apply, .. } = report.outcome else {
            panic!("expected applied");
        };
        let reverted = h.pipeline.rollback(&apply.rollback_plan, &mut p).await.unwrap();
        assert_eq!(reverted.len(), 1);
        assert_eq!(reverted[0].field, "model_id");
        assert_eq!(reverted[0].after.as_deref(), Some("big"));
        assert_eq!(p.status, ProposalStatus::RolledBack);
        assert_eq!(h.registry.agent("agent-1").unwrap().config.model_id, "big");
    }
}
