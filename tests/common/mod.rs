//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use capability_governor::impact::{PeriodMetrics, RoiCalculation};
use capability_governor::pipeline::{GovernancePipeline, PipelineBackends};
use capability_governor::proposal::TargetMetric;
use capability_governor::sandbox::SampleOutcome;
use capability_governor::store::{
    CollectingNotifier, InMemoryAgentRegistry, InMemoryGovernanceStore, InMemoryMetricsStore,
    OperationSample,
};
use capability_governor::{
    AgentConfig, AgentRecord, GovernorConfig, ImpactMetrics, ImprovementProposal, ManualClock,
    ProposedChange, SandboxExecutor, ValidationStatus,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

pub const AGENT: &str = "agent-1";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap()
}

/// A validated impact entry with the given component gains.
pub fn impact(agent: &str, perf: f64, cost: f64, rel: f64, at: DateTime<Utc>) -> ImpactMetrics {
    let id = format!("prop-{}", uuid::Uuid::new_v4());
    ImpactMetrics {
        improvement_id: ImpactMetrics::improvement_id_for(&id),
        proposal_id: id,
        agent_id: agent.to_string(),
        measurement_period_days: 7,
        performance_gain_percent: perf,
        cost_reduction_percent: cost,
        success_rate_increase: rel,
        baseline: PeriodMetrics::default(),
        improved: PeriodMetrics::default(),
        roi: RoiCalculation::default(),
        measured_at: at,
        validation_status: ValidationStatus::Validated,
    }
}

/// Runs every sample at a fixed latency and cost.
pub struct SteadyExecutor;

#[async_trait]
impl SandboxExecutor for SteadyExecutor {
    async fn execute_sample(
        &self,
        _sandbox_id: &str,
        _state: &AgentConfig,
        _sample_index: usize,
    ) -> Result<SampleOutcome, String> {
        Ok(SampleOutcome {
            latency_ms: 80.0,
            cost_cents: 0.8,
            success: true,
        })
    }
}

/// In-memory backends plus a manual clock, all shared with the pipeline.
pub struct World {
    pub clock: ManualClock,
    pub metrics: InMemoryMetricsStore,
    pub registry: InMemoryAgentRegistry,
    pub store: InMemoryGovernanceStore,
    pub notifier: CollectingNotifier,
}

impl World {
    pub fn new() -> Self {
        let registry = InMemoryAgentRegistry::new();
        registry.insert(AgentRecord {
            id: AGENT.into(),
            name: "support-bot".into(),
            active: true,
            config: AgentConfig {
                model_id: "large-v1".into(),
                tools: vec!["search".into(), "calculator".into()],
                parameters: BTreeMap::from([("temperature".to_string(), 0.7)]),
                strategy: "react".into(),
            },
        });
        Self {
            clock: ManualClock::new(t0()),
            metrics: InMemoryMetricsStore::new(),
            registry,
            store: InMemoryGovernanceStore::default(),
            notifier: CollectingNotifier::new(),
        }
    }

    pub fn pipeline(&self, config: GovernorConfig) -> GovernancePipeline {
        let backends = PipelineBackends {
            metrics: Arc::new(self.metrics.clone()),
            registry: Arc::new(self.registry.clone()),
            production: Arc::new(self.registry.clone()),
            executor: Arc::new(SteadyExecutor),
            store: Arc::new(self.store.clone()),
            notifier: Arc::new(self.notifier.clone()),
        };
        GovernancePipeline::new(backends, Arc::new(self.clock.clone()), config)
    }

    /// 100 operations spread over the week starting at `start`; the first
    /// `successes` succeed.
    pub fn seed_week(&self, start: DateTime<Utc>, latency: f64, cost: f64, successes: usize) {
        self.metrics.record_many((0..100).map(|i| OperationSample {
            agent_id: AGENT.into(),
            timestamp: start + Duration::minutes(i as i64 * 100),
            latency_ms: latency,
            cost_cents: cost,
            success: i < successes,
        }));
    }

    /// Baseline week ending 7 days before now, test week ending now.
    pub fn seed_trial(&self, baseline: (f64, f64, usize), test: (f64, f64, usize)) {
        use capability_governor::Clock;
        let now = self.clock.now();
        self.seed_week(now - Duration::days(14), baseline.0, baseline.1, baseline.2);
        self.seed_week(now - Duration::days(7), test.0, test.1, test.2);
    }
}

pub fn model_switch(to: &str) -> ImprovementProposal {
    ImprovementProposal::new(
        AGENT,
        "opp-latency",
        ProposedChange::ModelSwitch {
            from_model: "large-v1".into(),
            to_model: to.into(),
        },
        "switch to a distilled model",
        "same quality at lower cost",
        TargetMetric::Cost,
        12.0,
        t0(),
    )
}
