//! # Sandbox Runner
//!
//! ## Responsibility
//! Clone the subset of an agent's state a proposal touches into an isolated
//! environment, apply the proposed change there, and trial it with a bounded
//! number of sample executions.
//!
//! ## Guarantees
//! - Never writes production state: the runner only holds a read-only
//!   [`AgentRegistry`].
//! - Bounded: sample count is clamped to `max_sample_size` and every sample
//!   is wrapped in a timeout, so an infinite-loop hypothesis still terminates.
//! - Non-throwing: execution failures are collected in
//!   [`SandboxRunResult::errors`]; the caller decides whether to abort.
//! - `initial_metrics.success_rate ∈ [0, 1]`, latency and cost are
//!   non-negative.
//!
//! ## NOT Responsible For
//! - Running the agent itself (the runtime is behind [`SandboxExecutor`])
//! - Cross-process cancellation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::impact::PeriodMetrics;
use crate::proposal::ImprovementProposal;
use crate::store::{AgentConfig, AgentRegistry};
use crate::GovernanceError;

// ─── Configuration ────────────────────────────────────────────────────────────

fn default_max_sample_size() -> usize {
    1_000
}

fn default_sample_size() -> usize {
    100
}

fn default_sample_timeout_ms() -> u64 {
    5_000
}

/// Sandbox execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SandboxConfig {
    /// Hard ceiling on sample executions per run.
    #[serde(default = "default_max_sample_size")]
    pub max_sample_size: usize,
    /// Sample count the pipeline requests when the caller does not specify one.
    #[serde(default = "default_sample_size")]
    pub default_sample_size: usize,
    /// Per-sample execution timeout, in milliseconds.
    #[serde(default = "default_sample_timeout_ms")]
    pub sample_timeout_ms: u64,
    /// Abort the pipeline instead of measuring when the run reports errors.
    #[serde(default)]
    pub abort_on_errors: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_sample_size: default_max_sample_size(),
            default_sample_size: default_sample_size(),
            sample_timeout_ms: default_sample_timeout_ms(),
            abort_on_errors: false,
        }
    }
}

// ─── Types ────────────────────────────────────────────────────────────────────

/// An isolated execution context owned by one proposal's test run.
///
/// Not `Clone`: it is moved into the measurer and dropped when the
/// measurement completes.
#[derive(Debug, PartialEq, Serialize)]
pub struct SandboxEnvironment {
    /// `sandbox-<proposal id>`.
    pub id: String,
    /// Agent whose state was cloned.
    pub agent_id: String,
    /// Proposal under test.
    pub proposal_id: String,
    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,
    /// Deep copy of the agent configuration subset under test.
    pub isolated_state: AgentConfig,
    /// Whether the proposed change has been applied to `isolated_state`.
    pub change_applied: bool,
}

impl SandboxEnvironment {
    /// Sandbox identifier for a proposal.
    pub fn id_for(proposal_id: &str) -> String {
        format!("sandbox-{proposal_id}")
    }
}

/// Result of one trial execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    /// Wall time, in milliseconds.
    pub latency_ms: f64,
    /// Spend, in cents.
    pub cost_cents: f64,
    /// Whether the operation succeeded.
    pub success: bool,
}

/// A recorded, non-fatal sandbox failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxExecutionError {
    /// Sample that failed, `None` for setup failures.
    pub sample_index: Option<usize>,
    /// Description of the failure.
    pub message: String,
}

/// Outcome of a sandbox run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRunResult {
    /// `true` if at least one sample ran and no errors were recorded.
    pub success: bool,
    /// Every failure encountered, in order.
    pub errors: Vec<SandboxExecutionError>,
    /// Aggregates over the executed samples.
    pub initial_metrics: PeriodMetrics,
    /// Sample count the caller asked for.
    pub samples_requested: usize,
    /// Sample count actually attempted after clamping.
    pub samples_executed: usize,
}

/// Runs a single trial of an agent configuration.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Execute sample `sample_index` against `state`. Must not touch
    /// production state.
    async fn execute_sample(
        &self,
        sandbox_id: &str,
        state: &AgentConfig,
        sample_index: usize,
    ) -> Result<SampleOutcome, String>;
}

// ─── Runner ───────────────────────────────────────────────────────────────────

/// Creates sandboxes and trials proposals inside them.
#[derive(Clone)]
pub struct SandboxRunner {
    registry: Arc<dyn AgentRegistry>,
    executor: Arc<dyn SandboxExecutor>,
    clock: SharedClock,
    config: SandboxConfig,
}

impl SandboxRunner {
    /// Create a runner.
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        executor: Arc<dyn SandboxExecutor>,
        clock: SharedClock,
        config: SandboxConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            clock,
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Clone the agent's state into a fresh sandbox for `proposal`.
    ///
    /// # Errors
    /// - [`GovernanceError::AgentNotFound`] if the agent record is missing.
    /// - [`GovernanceError::AgentInactive`] if the agent is deactivated.
    /// - [`GovernanceError::ProposalMismatch`] if the proposal targets
    ///   another agent.
    /// - [`GovernanceError::Store`] if the registry is unreachable.
    pub async fn create_sandbox(
        &self,
        agent_id: &str,
        proposal: &ImprovementProposal,
    ) -> Result<SandboxEnvironment, GovernanceError> {
        if proposal.agent_id != agent_id {
            return Err(GovernanceError::ProposalMismatch(format!(
                "proposal '{}' targets agent '{}', not '{agent_id}'",
                proposal.id, proposal.agent_id
            )));
        }

        let agent = self
            .registry
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| GovernanceError::AgentNotFound(agent_id.to_string()))?;
        if !agent.active {
            return Err(GovernanceError::AgentInactive(agent_id.to_string()));
        }

        let tools = self.registry.installed_tools(agent_id).await?;
        let isolated_state = AgentConfig {
            model_id: agent.config.model_id.clone(),
            tools,
            parameters: agent.config.parameters.clone(),
            strategy: agent.config.strategy.clone(),
        };

        let sandbox = SandboxEnvironment {
            id: SandboxEnvironment::id_for(&proposal.id),
            agent_id: agent_id.to_string(),
            proposal_id: proposal.id.clone(),
            created_at: self.clock.now(),
            isolated_state,
            change_applied: false,
        };
        info!(
            agent_id = %agent_id,
            proposal_id = %proposal.id,
            sandbox_id = %sandbox.id,
            kind = proposal.kind().as_str(),
            "sandbox created"
        );
        Ok(sandbox)
    }

    /// Apply the proposal inside `sandbox` and execute up to `sample_size`
    /// trial samples.
    ///
    /// Never returns an error: every failure lands in
    /// [`SandboxRunResult::errors`].
    ///
    /// # Panics
    /// This function never panics.
    pub async fn run_in_sandbox(
        &self,
        proposal: &ImprovementProposal,
        sandbox: &mut SandboxEnvironment,
        sample_size: usize,
    ) -> SandboxRunResult {
        let mut errors = Vec::new();

        if sandbox.proposal_id != proposal.id {
            errors.push(SandboxExecutionError {
                sample_index: None,
                message: format!(
                    "sandbox '{}' belongs to proposal '{}', not '{}'",
                    sandbox.id, sandbox.proposal_id, proposal.id
                ),
            });
            return Self::finish(errors, Vec::new(), sample_size, 0);
        }

        if !sandbox.change_applied {
            match proposal.change.apply_to(&mut sandbox.isolated_state) {
                Ok(changes) => {
                    sandbox.change_applied = true;
                    debug!(sandbox_id = %sandbox.id, changes = changes.len(), "change applied in sandbox");
                }
                Err(e) => {
                    errors.push(SandboxExecutionError {
                        sample_index: None,
                        message: format!("could not apply change in sandbox: {e}"),
                    });
                    return Self::finish(errors, Vec::new(), sample_size, 0);
                }
            }
        }

        let effective = sample_size.min(self.config.max_sample_size);
        if effective < sample_size {
            warn!(
                sandbox_id = %sandbox.id,
                requested = sample_size,
                max = self.config.max_sample_size,
                "sample size clamped"
            );
        }
        if effective == 0 {
            errors.push(SandboxExecutionError {
                sample_index: None,
                message: "sample size must be at least 1".to_string(),
            });
            return Self::finish(errors, Vec::new(), sample_size, 0);
        }

        let timeout = Duration::from_millis(self.config.sample_timeout_ms);
        let mut outcomes = Vec::with_capacity(effective);
        for i in 0..effective {
            let run = self
                .executor
                .execute_sample(&sandbox.id, &sandbox.isolated_state, i);
            match tokio::time::timeout(timeout, run).await {
                Ok(Ok(outcome)) => match validate_outcome(&outcome) {
                    Ok(()) => outcomes.push(outcome),
                    Err(message) => errors.push(SandboxExecutionError {
                        sample_index: Some(i),
                        message,
                    }),
                },
                Ok(Err(message)) => errors.push(SandboxExecutionError {
                    sample_index: Some(i),
                    message,
                }),
                Err(_) => errors.push(SandboxExecutionError {
                    sample_index: Some(i),
                    message: format!("sample timed out after {timeout:?}"),
                }),
            }
        }

        let result = Self::finish(errors, outcomes, sample_size, effective);
        info!(
            sandbox_id = %sandbox.id,
            executed = result.samples_executed,
            errors = result.errors.len(),
            success_rate = result.initial_metrics.success_rate,
            "sandbox run complete"
        );
        result
    }

    fn finish(
        errors: Vec<SandboxExecutionError>,
        outcomes: Vec<SampleOutcome>,
        requested: usize,
        executed: usize,
    ) -> SandboxRunResult {
        let initial_metrics = if executed == 0 {
            PeriodMetrics::default()
        } else {
            let n = outcomes.len().max(1) as f64;
            let succeeded = outcomes.iter().filter(|o| o.success).count();
            PeriodMetrics {
                avg_latency_ms: outcomes.iter().map(|o| o.latency_ms).sum::<f64>() / n,
                avg_cost_cents: outcomes.iter().map(|o| o.cost_cents).sum::<f64>() / n,
                // Errored samples count as failed operations.
                success_rate: (succeeded as f64 / executed as f64).clamp(0.0, 1.0),
                total_operations: executed as u64,
            }
        };
        SandboxRunResult {
            success: executed > 0 && errors.is_empty(),
            errors,
            initial_metrics,
            samples_requested: requested,
            samples_executed: executed,
        }
    }
}

fn validate_outcome(outcome: &SampleOutcome) -> Result<(), String> {
    if !outcome.latency_ms.is_finite() || outcome.latency_ms < 0.0 {
        return Err(format!("invalid latency {}", outcome.latency_ms));
    }
    if !outcome.cost_cents.is_finite() || outcome.cost_cents < 0.0 {
        return Err(format!("invalid cost {}", outcome.cost_cents));
    }
    Ok(())
}
