//! # Production Applier
//!
//! ## Responsibility
//! Commit a validated, gate-cleared improvement to production agent state and
//! hand back the rollback plan that undoes it. Execute that plan on request.
//!
//! ## Guarantees
//! - An unvalidated measurement never reaches production: it fails with
//!   [`GovernanceError::NotValidated`] before any read or write.
//! - A rollback plan exists for every applied change. It is derived from the
//!   prior state recorded on the proposal, not inferred afterwards.
//! - Production is written at most once per call; on any error the proposal
//!   status is left unchanged.
//! - Writes are compare-and-swap. A commit that loses a race re-reads the
//!   agent and reapplies its change on top of the winner's, so concurrent
//!   improvements to one agent never overwrite each other.
//!
//! ## NOT Responsible For
//! - Gate checks (see `gate`)
//! - Deciding when to roll back (callers or operators do)

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::impact::{ImpactMeasurementResult, ImpactMetrics};
use crate::proposal::{AppliedChange, ImprovementProposal, ProposalStatus, ProposedChange};
use crate::store::{AgentRecord, ProductionState, StoreError};
use crate::GovernanceError;

/// Commit attempts before a contended write gives up with
/// [`GovernanceError::ChangeConflict`].
const MAX_COMMIT_ATTEMPTS: u32 = 5;

// ─── Rollback plan ────────────────────────────────────────────────────────────

/// A single reversal operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackAction {
    /// Reactivate a previous model.
    RestoreModel {
        /// Model to reactivate.
        model_id: String,
    },
    /// Set a parameter back to its previous value.
    RestoreParameter {
        /// Parameter name.
        parameter: String,
        /// Previous value, rendered.
        value: String,
    },
    /// Remove a parameter the improvement introduced.
    RemoveParameter {
        /// Parameter name.
        parameter: String,
    },
    /// Uninstall a tool the improvement installed.
    UninstallTool {
        /// Tool name.
        tool: String,
    },
    /// Reinstall a tool the improvement removed.
    ReinstallTool {
        /// Tool name.
        tool: String,
    },
    /// Reactivate a previous strategy.
    RestoreStrategy {
        /// Strategy to reactivate.
        strategy: String,
    },
    /// Confirm the agent is healthy after reversal.
    VerifyHealth,
}

impl RollbackAction {
    /// Expected wall time of this step, in seconds.
    pub fn estimated_secs(&self) -> u64 {
        match self {
            RollbackAction::RestoreModel { .. } => 60,
            RollbackAction::RestoreParameter { .. } | RollbackAction::RemoveParameter { .. } => 10,
            RollbackAction::UninstallTool { .. } | RollbackAction::ReinstallTool { .. } => 30,
            RollbackAction::RestoreStrategy { .. } => 45,
            RollbackAction::VerifyHealth => 30,
        }
    }
}

/// One ordered step of a rollback plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackStep {
    /// 1-based execution order.
    pub order: u32,
    /// What to do.
    #[serde(flatten)]
    pub action: RollbackAction,
    /// Human-readable description.
    pub description: String,
}

/// Ordered reversal steps for one applied improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// Improvement this plan reverses.
    pub improvement_id: String,
    /// Agent the improvement was applied to.
    pub agent_id: String,
    /// Proposal the improvement came from.
    pub proposal_id: String,
    /// The change that restores the prior state.
    pub change: ProposedChange,
    /// Steps, in execution order.
    pub steps: Vec<RollbackStep>,
    /// Sum of the step estimates, in seconds.
    pub estimated_duration_secs: u64,
    /// When the plan was produced.
    pub created_at: DateTime<Utc>,
}

impl RollbackPlan {
    /// Build the plan that reverses `change`.
    pub fn for_change(
        improvement_id: impl Into<String>,
        agent_id: impl Into<String>,
        proposal_id: impl Into<String>,
        change: &ProposedChange,
        created_at: DateTime<Utc>,
    ) -> Self {
        let inverse = change.inverse();
        let mut actions = Vec::new();
        match &inverse {
            ProposedChange::ModelSwitch { to_model, .. } => actions.push((
                RollbackAction::RestoreModel {
                    model_id: to_model.clone(),
                },
                format!("Reactivate model '{to_model}'"),
            )),
            ProposedChange::ParameterTune {
                parameter, to_value, ..
            } => actions.push(match to_value {
                Some(v) => (
                    RollbackAction::RestoreParameter {
                        parameter: parameter.clone(),
                        value: v.to_string(),
                    },
                    format!("Set parameter '{parameter}' back to {v}"),
                ),
                None => (
                    RollbackAction::RemoveParameter {
                        parameter: parameter.clone(),
                    },
                    format!("Remove parameter '{parameter}'"),
                ),
            }),
            ProposedChange::ToolSwap {
                remove_tool,
                install_tool,
            } => {
                if let Some(tool) = remove_tool {
                    actions.push((
                        RollbackAction::UninstallTool { tool: tool.clone() },
                        format!("Uninstall tool '{tool}'"),
                    ));
                }
                if let Some(tool) = install_tool {
                    actions.push((
                        RollbackAction::ReinstallTool { tool: tool.clone() },
                        format!("Reinstall tool '{tool}'"),
                    ));
                }
            }
            ProposedChange::StrategyUpdate { to_strategy, .. } => actions.push((
                RollbackAction::RestoreStrategy {
                    strategy: to_strategy.clone(),
                },
                format!("Reactivate strategy '{to_strategy}'"),
            )),
        }
        actions.push((
            RollbackAction::VerifyHealth,
            "Verify agent health after reversal".to_string(),
        ));

        let estimated_duration_secs = actions.iter().map(|(a, _)| a.estimated_secs()).sum();
        let steps = actions
            .into_iter()
            .enumerate()
            .map(|(i, (action, description))| RollbackStep {
                order: i as u32 + 1,
                action,
                description,
            })
            .collect();

        Self {
            improvement_id: improvement_id.into(),
            agent_id: agent_id.into(),
            proposal_id: proposal_id.into(),
            change: inverse,
            steps,
            estimated_duration_secs,
            created_at,
        }
    }
}

/// Result of a successful production apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Always `true`; failures are returned as errors.
    pub success: bool,
    /// `imp-<proposal id>`.
    pub improvement_id: String,
    /// Field-level modifications made.
    pub changes: Vec<AppliedChange>,
    /// How to undo them.
    pub rollback_plan: RollbackPlan,
    /// When production was written.
    pub applied_at: DateTime<Utc>,
}

// ─── Applier ──────────────────────────────────────────────────────────────────

/// Sole writer of production agent configuration.
#[derive(Clone)]
pub struct ProductionApplier {
    state: Arc<dyn ProductionState>,
    clock: SharedClock,
}

impl ProductionApplier {
    /// Create an applier over `state`.
    pub fn new(state: Arc<dyn ProductionState>, clock: SharedClock) -> Self {
        Self { state, clock }
    }

    /// Commit `proposal` to production.
    ///
    /// On success the proposal moves to `applied`.
    ///
    /// # Errors
    /// - [`GovernanceError::NotValidated`] if `result.validated` is false.
    /// - [`GovernanceError::ProposalMismatch`] if `result` or `proposal`
    ///   belongs to a different proposal or agent.
    /// - [`GovernanceError::Proposal`] if the proposal is not in `validated`.
    /// - [`GovernanceError::AgentNotFound`] / [`GovernanceError::AgentInactive`].
    /// - [`GovernanceError::ChangeConflict`] if production no longer matches
    ///   the prior state recorded on the proposal.
    /// - [`GovernanceError::Store`] if the write fails.
    pub async fn apply_to_production(
        &self,
        agent_id: &str,
        proposal: &mut ImprovementProposal,
        result: &ImpactMeasurementResult,
    ) -> Result<ApplyOutcome, GovernanceError> {
        if !result.validated {
            return Err(GovernanceError::NotValidated(proposal.id.clone()));
        }
        if result.proposal_id != proposal.id || proposal.agent_id != agent_id {
            return Err(GovernanceError::ProposalMismatch(format!(
                "measurement for '{}' cannot apply proposal '{}' to agent '{agent_id}'",
                result.proposal_id, proposal.id
            )));
        }
        ensure_transition(proposal, ProposalStatus::Applied)?;

        let started = Instant::now();
        let changes = self.write_change(agent_id, &proposal.change, true).await?;
        proposal.transition_to(ProposalStatus::Applied)?;

        let applied_at = self.clock.now();
        let improvement_id = ImpactMetrics::improvement_id_for(&proposal.id);
        let rollback_plan = RollbackPlan::for_change(
            improvement_id.clone(),
            agent_id,
            proposal.id.clone(),
            &proposal.change,
            applied_at,
        );

        crate::metrics::record_proposal("applied");
        crate::metrics::observe_stage("apply", started.elapsed().as_secs_f64());
        info!(
            agent_id = %agent_id,
            proposal_id = %proposal.id,
            improvement_id = %improvement_id,
            changes = changes.len(),
            rollback_steps = rollback_plan.steps.len(),
            rollback_secs = rollback_plan.estimated_duration_secs,
            "improvement applied to production"
        );

        Ok(ApplyOutcome {
            success: true,
            improvement_id,
            changes,
            rollback_plan,
            applied_at,
        })
    }

    /// Execute `plan`, restoring the configuration the improvement replaced.
    ///
    /// On success the proposal moves to `rolled_back`.
    ///
    /// # Errors
    /// - [`GovernanceError::ProposalMismatch`] if the plan belongs to another
    ///   proposal.
    /// - [`GovernanceError::Proposal`] if the proposal is not `applied`.
    /// - [`GovernanceError::ChangeConflict`] if production drifted since the
    ///   improvement was applied.
    /// - [`GovernanceError::AgentNotFound`] / [`GovernanceError::Store`].
    pub async fn rollback(
        &self,
        plan: &RollbackPlan,
        proposal: &mut ImprovementProposal,
    ) -> Result<Vec<AppliedChange>, GovernanceError> {
        if plan.proposal_id != proposal.id || plan.agent_id != proposal.agent_id {
            return Err(GovernanceError::ProposalMismatch(format!(
                "rollback plan for '{}' cannot revert proposal '{}'",
                plan.proposal_id, proposal.id
            )));
        }
        ensure_transition(proposal, ProposalStatus::RolledBack)?;

        // Deactivated agents can still be reverted.
        let changes = match self.write_change(&plan.agent_id, &plan.change, false).await {
            Ok(changes) => changes,
            Err(GovernanceError::ChangeConflict(reason)) => {
                warn!(
                    agent_id = %plan.agent_id,
                    improvement_id = %plan.improvement_id,
                    error = %reason,
                    "rollback aborted: production drifted"
                );
                return Err(GovernanceError::ChangeConflict(reason));
            }
            Err(e) => return Err(e),
        };
        proposal.transition_to(ProposalStatus::RolledBack)?;

        crate::metrics::record_proposal("rolled_back");
        info!(
            agent_id = %plan.agent_id,
            improvement_id = %plan.improvement_id,
            steps = plan.steps.len(),
            "improvement rolled back"
        );
        Ok(changes)
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<AgentRecord, GovernanceError> {
        self.state
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| GovernanceError::AgentNotFound(agent_id.to_string()))
    }

    /// Apply `change` to the agent's current configuration and commit it
    /// against the configuration it was computed from.
    async fn write_change(
        &self,
        agent_id: &str,
        change: &ProposedChange,
        require_active: bool,
    ) -> Result<Vec<AppliedChange>, GovernanceError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let agent = self.fetch_agent(agent_id).await?;
            if require_active && !agent.active {
                return Err(GovernanceError::AgentInactive(agent_id.to_string()));
            }
            let mut config = agent.config.clone();
            let changes = change
                .apply_to(&mut config)
                .map_err(|e| GovernanceError::ChangeConflict(e.to_string()))?;
            match self.state.commit_config(agent_id, &agent.config, config).await {
                Ok(()) => return Ok(changes),
                Err(StoreError::Conflict(reason)) => {
                    debug!(agent_id = %agent_id, attempt, reason = %reason, "production commit raced, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GovernanceError::ChangeConflict(format!(
            "agent '{agent_id}' kept changing across {MAX_COMMIT_ATTEMPTS} commit attempts"
        )))
    }
}

fn ensure_transition(
    proposal: &ImprovementProposal,
    next: ProposalStatus,
) -> Result<(), GovernanceError> {
    if proposal.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(crate::proposal::ProposalError::InvalidTransition {
            proposal_id: proposal.id.clone(),
            from: proposal.status,
            to: next,
        }
        .into())
    }
}
