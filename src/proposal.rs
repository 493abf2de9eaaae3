//! # Improvement Proposals
//!
//! ## Responsibility
//! Model a hypothesis about a self-modification: what would change, which
//! metric it should move, by how much, and where it is in its lifecycle.
//!
//! ## Guarantees
//! - Status transitions are one-directional:
//!   `proposed → testing → {validated → applied → rolled_back | rejected}`.
//! - Every [`ProposedChange`] records the prior state it replaces, so its
//!   inverse is always computable.
//! - The improvement kind is derived from the change and cannot disagree
//!   with it.
//!
//! ## NOT Responsible For
//! - Generating hypotheses from telemetry (bottleneck analysis is external)
//! - Executing changes (see `sandbox` and `applier`)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::scoring;
use crate::store::AgentConfig;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors produced while manipulating proposals and their changes.
#[derive(Debug, Error, PartialEq)]
pub enum ProposalError {
    /// The requested status transition is not part of the lifecycle.
    #[error("invalid transition for proposal '{proposal_id}': {from} -> {to}")]
    InvalidTransition {
        /// Proposal being transitioned.
        proposal_id: String,
        /// Current status.
        from: ProposalStatus,
        /// Requested status.
        to: ProposalStatus,
    },

    /// The change's recorded prior state does not match the agent's state.
    #[error("change conflict: {0}")]
    ChangeConflict(String),
}

// ─── Enums ────────────────────────────────────────────────────────────────────

/// Category of a self-modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementKind {
    /// Swap the active model.
    ModelSwitch,
    /// Adjust a tunable parameter.
    ParameterTune,
    /// Replace or install a tool.
    ToolSwap,
    /// Change the high-level execution strategy.
    StrategyUpdate,
}

impl ImprovementKind {
    /// Stable snake_case label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImprovementKind::ModelSwitch => "model_switch",
            ImprovementKind::ParameterTune => "parameter_tune",
            ImprovementKind::ToolSwap => "tool_swap",
            ImprovementKind::StrategyUpdate => "strategy_update",
        }
    }
}

/// Metric a proposal is expected to improve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    /// Average cost per operation.
    Cost,
    /// Average latency per operation.
    Speed,
    /// Operation success rate.
    Reliability,
}

/// Lifecycle status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Drafted, not yet trialled.
    Proposed,
    /// Sandbox trial and measurement in progress.
    Testing,
    /// Measurement validated the hypothesis.
    Validated,
    /// Measurement rejected the hypothesis. Terminal.
    Rejected,
    /// Committed to production.
    Applied,
    /// Reverted after being applied. Terminal.
    RolledBack,
}

impl ProposalStatus {
    /// Return `true` if `self → next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Proposed, Testing)
                | (Testing, Validated)
                | (Testing, Rejected)
                | (Validated, Applied)
                | (Applied, RolledBack)
        )
    }

    /// Return `true` if no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProposalStatus::Rejected | ProposalStatus::RolledBack)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Testing => "testing",
            ProposalStatus::Validated => "validated",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Applied => "applied",
            ProposalStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

// ─── Proposed change ──────────────────────────────────────────────────────────

/// The concrete modification a proposal would make, including the state it
/// replaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposedChange {
    /// Replace the active model.
    ModelSwitch {
        /// Model expected to be active before the change.
        from_model: String,
        /// Model to activate.
        to_model: String,
    },
    /// Set a tunable parameter.
    ParameterTune {
        /// Parameter name.
        parameter: String,
        /// Value before the change; `None` if the parameter is new.
        from_value: Option<f64>,
        /// Value after the change; `None` removes the parameter.
        to_value: Option<f64>,
    },
    /// Install and/or uninstall a tool.
    ToolSwap {
        /// Tool to uninstall, if any.
        remove_tool: Option<String>,
        /// Tool to install, if any.
        install_tool: Option<String>,
    },
    /// Replace the execution strategy.
    StrategyUpdate {
        /// Strategy expected to be active before the change.
        from_strategy: String,
        /// Strategy to activate.
        to_strategy: String,
    },
}

/// A single field-level modification made to an agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    /// Configuration field touched (e.g. `model_id`, `parameters.temperature`).
    pub field: String,
    /// Rendered value before the change.
    pub before: Option<String>,
    /// Rendered value after the change.
    pub after: Option<String>,
}

impl ProposedChange {
    /// Category of this change.
    pub fn kind(&self) -> ImprovementKind {
        match self {
            ProposedChange::ModelSwitch { .. } => ImprovementKind::ModelSwitch,
            ProposedChange::ParameterTune { .. } => ImprovementKind::ParameterTune,
            ProposedChange::ToolSwap { .. } => ImprovementKind::ToolSwap,
            ProposedChange::StrategyUpdate { .. } => ImprovementKind::StrategyUpdate,
        }
    }

    /// The change that undoes this one.
    pub fn inverse(&self) -> ProposedChange {
        match self {
            ProposedChange::ModelSwitch {
                from_model,
                to_model,
            } => ProposedChange::ModelSwitch {
                from_model: to_model.clone(),
                to_model: from_model.clone(),
            },
            ProposedChange::ParameterTune {
                parameter,
                from_value,
                to_value,
            } => ProposedChange::ParameterTune {
                parameter: parameter.clone(),
                from_value: *to_value,
                to_value: *from_value,
            },
            ProposedChange::ToolSwap {
                remove_tool,
                install_tool,
            } => ProposedChange::ToolSwap {
                remove_tool: install_tool.clone(),
                install_tool: remove_tool.clone(),
            },
            ProposedChange::StrategyUpdate {
                from_strategy,
                to_strategy,
            } => ProposedChange::StrategyUpdate {
                from_strategy: to_strategy.clone(),
                to_strategy: from_strategy.clone(),
            },
        }
    }

    /// Apply this change to `config` in place.
    ///
    /// The recorded prior state must match `config`; on mismatch nothing is
    /// modified and [`ProposalError::ChangeConflict`] is returned.
    ///
    /// # Panics
    /// This function never panics.
    pub fn apply_to(&self, config: &mut AgentConfig) -> Result<Vec<AppliedChange>, ProposalError> {
        match self {
            ProposedChange::ModelSwitch {
                from_model,
                to_model,
            } => {
                if &config.model_id != from_model {
                    return Err(ProposalError::ChangeConflict(format!(
                        "expected active model '{from_model}', found '{}'",
                        config.model_id
                    )));
                }
                let before = std::mem::replace(&mut config.model_id, to_model.clone());
                Ok(vec![AppliedChange {
                    field: "model_id".to_string(),
                    before: Some(before),
                    after: Some(to_model.clone()),
                }])
            }
            ProposedChange::ParameterTune {
                parameter,
                from_value,
                to_value,
            } => {
                let current = config.parameters.get(parameter).copied();
                let matches = match (current, from_value) {
                    (None, None) => true,
                    (Some(cur), Some(prev)) => (cur - prev).abs() <= f64::EPSILON,
                    _ => false,
                };
                if !matches {
                    return Err(ProposalError::ChangeConflict(format!(
                        "parameter '{parameter}' expected {from_value:?}, found {current:?}"
                    )));
                }
                match to_value {
                    Some(v) => {
                        config.parameters.insert(parameter.clone(), *v);
                    }
                    None => {
                        config.parameters.remove(parameter);
                    }
                }
                Ok(vec![AppliedChange {
                    field: format!("parameters.{parameter}"),
                    before: current.map(|v| v.to_string()),
                    after: to_value.map(|v| v.to_string()),
                }])
            }
            ProposedChange::ToolSwap {
                remove_tool,
                install_tool,
            } => {
                if let Some(removed) = remove_tool {
                    if !config.tools.iter().any(|t| t == removed) {
                        return Err(ProposalError::ChangeConflict(format!(
                            "tool '{removed}' is not installed"
                        )));
                    }
                }
                if let Some(installed) = install_tool {
                    if config.tools.iter().any(|t| t == installed) && remove_tool.as_ref() != Some(installed) {
                        return Err(ProposalError::ChangeConflict(format!(
                            "tool '{installed}' is already installed"
                        )));
                    }
                }
                let mut changes = Vec::new();
                if let Some(removed) = remove_tool {
                    config.tools.retain(|t| t != removed);
                    changes.push(AppliedChange {
                        field: "tools".to_string(),
                        before: Some(removed.clone()),
                        after: None,
                    });
                }
                if let Some(installed) = install_tool {
                    config.tools.push(installed.clone());
                    changes.push(AppliedChange {
                        field: "tools".to_string(),
                        before: None,
                        after: Some(installed.clone()),
                    });
                }
                Ok(changes)
            }
            ProposedChange::StrategyUpdate {
                from_strategy,
                to_strategy,
            } => {
                if &config.strategy != from_strategy {
                    return Err(ProposalError::ChangeConflict(format!(
                        "expected strategy '{from_strategy}', found '{}'",
                        config.strategy
                    )));
                }
                let before = std::mem::replace(&mut config.strategy, to_strategy.clone());
                Ok(vec![AppliedChange {
                    field: "strategy".to_string(),
                    before: Some(before),
                    after: Some(to_strategy.clone()),
                }])
            }
        }
    }
}

// ─── Opportunity ──────────────────────────────────────────────────────────────

/// A bottleneck surfaced by the (external) telemetry analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementOpportunity {
    /// Unique opportunity identifier.
    pub id: String,
    /// Agent the bottleneck was observed on.
    pub agent_id: String,
    /// Metric the bottleneck affects.
    pub target_metric: TargetMetric,
    /// Human-readable description of the bottleneck.
    pub description: String,
    /// Estimated improvement available, in percent.
    pub estimated_impact_percent: f64,
}

// ─── Proposal ─────────────────────────────────────────────────────────────────

/// A hypothesis about a self-modification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementProposal {
    /// Unique proposal identifier.
    pub id: String,
    /// Agent the change targets.
    pub agent_id: String,
    /// Opportunity this proposal answers.
    pub opportunity_id: String,
    /// The concrete modification.
    pub change: ProposedChange,
    /// Short description of the change.
    pub description: String,
    /// Free-text hypothesis.
    pub hypothesis: String,
    /// Metric expected to improve.
    pub target_metric: TargetMetric,
    /// Expected improvement on `target_metric`, in percent.
    pub expected_improvement_percent: f64,
    /// When the proposal was drafted.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: ProposalStatus,
}

impl ImprovementProposal {
    /// Draft a new proposal in `Proposed` status with a random id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        opportunity_id: impl Into<String>,
        change: ProposedChange,
        description: impl Into<String>,
        hypothesis: impl Into<String>,
        target_metric: TargetMetric,
        expected_improvement_percent: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("prop-{}", Uuid::new_v4()),
            agent_id: agent_id.into(),
            opportunity_id: opportunity_id.into(),
            change,
            description: description.into(),
            hypothesis: hypothesis.into(),
            target_metric,
            expected_improvement_percent,
            created_at,
            status: ProposalStatus::Proposed,
        }
    }

    /// Draft a proposal answering `opportunity`, inheriting its agent, target
    /// metric and estimated impact.
    pub fn from_opportunity(
        opportunity: &ImprovementOpportunity,
        change: ProposedChange,
        hypothesis: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            opportunity.agent_id.clone(),
            opportunity.id.clone(),
            change,
            opportunity.description.clone(),
            hypothesis,
            opportunity.target_metric,
            opportunity.estimated_impact_percent,
            created_at,
        )
    }

    /// Category of the proposed change.
    pub fn kind(&self) -> ImprovementKind {
        self.change.kind()
    }

    /// Move to `next`, rejecting transitions outside the lifecycle.
    ///
    /// # Errors
    /// Returns [`ProposalError::InvalidTransition`] for illegal steps.
    pub fn transition_to(&mut self, next: ProposalStatus) -> Result<(), ProposalError> {
        if !self.status.can_transition_to(next) {
            return Err(ProposalError::InvalidTransition {
                proposal_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Capability gain this proposal would produce if its hypothesis held
    /// exactly, for comparison against the safe improvement limit.
    pub fn projected_gain(&self) -> f64 {
        let pct = self.expected_improvement_percent;
        match self.target_metric {
            TargetMetric::Speed => scoring::weighted_gain(pct, 0.0, 0.0),
            TargetMetric::Cost => scoring::weighted_gain(0.0, pct, 0.0),
            TargetMetric::Reliability => scoring::weighted_gain(0.0, 0.0, pct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> AgentConfig {
        let mut parameters = BTreeMap::new();
        parameters.insert("temperature".to_string(), 0.7);
        AgentConfig {
            model_id: "gpt-4".to_string(),
            tools: vec!["web_search".to_string(), "calculator".to_string()],
            parameters,
            strategy: "react".to_string(),
        }
    }

    fn proposal(change: ProposedChange) -> ImprovementProposal {
        ImprovementProposal::new(
            "agent-1",
            "opp-1",
            change,
            "switch model",
            "cheaper model keeps quality",
            TargetMetric::Cost,
            30.0,
            Utc::now(),
        )
    }

    #[test]
    fn test_kind_derived_from_change() {
        let p = proposal(ProposedChange::StrategyUpdate {
            from_strategy: "react".into(),
            to_strategy: "plan_execute".into(),
        });
        assert_eq!(p.kind(), ImprovementKind::StrategyUpdate);
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut p = proposal(ProposedChange::ModelSwitch {
            from_model: "gpt-4".into(),
            to_model: "gpt-4o-mini".into(),
        });
        p.transition_to(ProposalStatus::Testing).unwrap();
        p.transition_to(ProposalStatus::Validated).unwrap();
        p.transition_to(ProposalStatus::Applied).unwrap();
        p.transition_to(ProposalStatus::RolledBack).unwrap();
        assert!(p.status.is_terminal());
    }

    #[test]
    fn test_lifecycle_rejects_backward_step() {
        let mut p = proposal(ProposedChange::ModelSwitch {
            from_model: "gpt-4".into(),
            to_model: "gpt-4o-mini".into(),
        });
        p.transition_to(ProposalStatus::Testing).unwrap();
        p.transition_to(ProposalStatus::Rejected).unwrap();
        let err = p.transition_to(ProposalStatus::Testing).unwrap_err();
        assert!(matches!(err, ProposalError::InvalidTransition { .. }));
        assert_eq!(p.status, ProposalStatus::Rejected);
    }

    #[test]
    fn test_lifecycle_cannot_apply_without_validation() {
        let mut p = proposal(ProposedChange::ModelSwitch {
            from_model: "gpt-4".into(),
            to_model: "gpt-4o-mini".into(),
        });
        p.transition_to(ProposalStatus::Testing).unwrap();
        assert!(p.transition_to(ProposalStatus::Applied).is_err());
    }

    #[test]
    fn test_model_switch_applies_and_inverts() {
        let mut cfg = config();
        let change = ProposedChange::ModelSwitch {
            from_model: "gpt-4".into(),
            to_model: "gpt-4o-mini".into(),
        };
        let applied = change.apply_to(&mut cfg).unwrap();
        assert_eq!(cfg.model_id, "gpt-4o-mini");
        assert_eq!(applied[0].before.as_deref(), Some("gpt-4"));
        change.inverse().apply_to(&mut cfg).unwrap();
        assert_eq!(cfg, config());
    }

    #[test]
    fn test_model_switch_conflict_leaves_config_untouched() {
        let mut cfg = config();
        let change = ProposedChange::ModelSwitch {
            from_model: "claude-3".into(),
            to_model: "gpt-4o-mini".into(),
        };
        let err = change.apply_to(&mut cfg).unwrap_err();
        assert!(matches!(err, ProposalError::ChangeConflict(_)));
        assert_eq!(cfg, config());
    }

    #[test]
    fn test_new_parameter_inverse_removes_it() {
        let mut cfg = config();
        let change = ProposedChange::ParameterTune {
            parameter: "top_p".into(),
            from_value: None,
            to_value: Some(0.9),
        };
        change.apply_to(&mut cfg).unwrap();
        assert_eq!(cfg.parameters.get("top_p"), Some(&0.9));
        change.inverse().apply_to(&mut cfg).unwrap();
        assert!(!cfg.parameters.contains_key("top_p"));
        assert_eq!(cfg, config());
    }

    #[test]
    fn test_tool_swap_round_trip() {
        let mut cfg = config();
        let change = ProposedChange::ToolSwap {
            remove_tool: Some("web_search".into()),
            install_tool: Some("fast_search".into()),
        };
        change.apply_to(&mut cfg).unwrap();
        assert!(cfg.tools.contains(&"fast_search".to_string()));
        assert!(!cfg.tools.contains(&"web_search".to_string()));
        change.inverse().apply_to(&mut cfg).unwrap();
        let mut tools = cfg.tools.clone();
        tools.sort();
        assert_eq!(tools, vec!["calculator".to_string(), "web_search".to_string()]);
    }

    #[test]
    fn test_tool_install_only_inverse_uninstalls() {
        let mut cfg = config();
        let change = ProposedChange::ToolSwap {
            remove_tool: None,
            install_tool: Some("code_runner".into()),
        };
        change.apply_to(&mut cfg).unwrap();
        change.inverse().apply_to(&mut cfg).unwrap();
        assert_eq!(cfg, config());
    }

    #[test]
    fn test_tool_swap_missing_tool_conflicts() {
        let mut cfg = config();
        let change = ProposedChange::ToolSwap {
            remove_tool: Some("not_installed".into()),
            install_tool: Some("fast_search".into()),
        };
        assert!(change.apply_to(&mut cfg).is_err());
    }

    #[test]
    fn test_projected_gain_uses_target_weight() {
        let p = proposal(ProposedChange::ModelSwitch {
            from_model: "gpt-4".into(),
            to_model: "gpt-4o-mini".into(),
        });
        // Cost target, 30% expected → 30 × 0.3.
        assert!((p.projected_gain() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_opportunity_inherits_fields() {
        let opp = ImprovementOpportunity {
            id: "opp-9".into(),
            agent_id: "agent-7".into(),
            target_metric: TargetMetric::Speed,
            description: "slow retrieval".into(),
            estimated_impact_percent: 25.0,
        };
        let p = ImprovementProposal::from_opportunity(
            &opp,
            ProposedChange::ToolSwap {
                remove_tool: Some("web_search".into()),
                install_tool: Some("fast_search".into()),
            },
            "faster index",
            Utc::now(),
        );
        assert_eq!(p.agent_id, "agent-7");
        assert_eq!(p.opportunity_id, "opp-9");
        assert_eq!(p.target_metric, TargetMetric::Speed);
        assert_eq!(p.status, ProposalStatus::Proposed);
        assert!(p.id.starts_with("prop-"));
    }

    #[test]
    fn test_change_serializes_with_kind_tag() {
        let change = ProposedChange::StrategyUpdate {
            from_strategy: "react".into(),
            to_strategy: "reflexion".into(),
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"kind\":\"strategy_update\""));
    }
}
