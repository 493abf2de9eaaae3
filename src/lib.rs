//! # capability-governor
//!
//! Governance for agents that propose changes to their own configuration.
//!
//! ## Architecture
//!
//! Every proposal walks a fixed pipeline; any stage can stop it:
//! ```text
//! Proposal → Sandbox → ImpactMeasurer → CapabilityGate(pre-commit) → ProductionApplier
//!                                                                          │
//!                         CapabilityGate(post-hoc) ← VelocityTracker ←─────┘
//! ```
//!
//! - [`sandbox::SandboxRunner`] trials a change against a private copy of
//!   the agent config. Production is never touched.
//! - [`impact::ImpactMeasurer`] compares a 7-day baseline against a 7-day
//!   test period and decides validation, vetoing any reliability loss past
//!   tolerance.
//! - [`velocity::VelocityTracker`] turns the impact log into a capability
//!   growth rate per day and raises trend alerts.
//! - [`gate::CapabilityGate`] enforces the per-day ceiling before and after
//!   commit, opening approval requests for human review.
//! - [`applier::ProductionApplier`] commits validated changes and returns a
//!   rollback plan.
//! - [`pipeline::GovernancePipeline`] wires the above together.
//!
//! Storage, the agent registry and sample execution are trait seams (see
//! [`store`] and [`sandbox::SandboxExecutor`]); in-memory implementations
//! ship for tests and embedding.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod alert;
pub mod applier;
pub mod clock;
pub mod config;
pub mod gate;
pub mod impact;
pub mod metrics;
pub mod pipeline;
pub mod proposal;
pub mod sandbox;
pub mod scoring;
pub mod store;
pub mod velocity;

// Re-exports for convenience
pub use alert::{Alert, AlertKind, AlertSeverity, Notifier, TracingNotifier};
pub use applier::{ApplyOutcome, ProductionApplier, RollbackPlan};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, GovernorConfig};
pub use gate::{CapabilityGate, GateConfig, GateEnforcementResult, GateState};
pub use impact::{ImpactMeasurer, ImpactMetrics, ValidationStatus};
pub use pipeline::{GovernancePipeline, PipelineOutcome};
pub use proposal::{ImprovementKind, ImprovementProposal, ProposalError, ProposalStatus, ProposedChange};
pub use sandbox::{SandboxExecutor, SandboxRunner};
pub use scoring::{capability_gain, CapabilityScorer};
pub use store::{AgentConfig, AgentRecord, StoreError};
pub use velocity::{VelocityMeasurement, VelocityTracker, VelocityTrend};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`GovernanceError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use capability_governor::{init_tracing, GovernanceError};
/// # fn example() -> Result<(), GovernanceError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), GovernanceError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| GovernanceError::Other(format!("tracing init failed: {e}")))
}

/// Top-level governance errors.
///
/// Every fallible stage maps its failure to a variant here. Gate decisions
/// and rejected validations are *outcomes*, not errors; see
/// [`pipeline::PipelineOutcome`].
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// No agent with this id in the registry.
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    /// The agent exists but is deactivated.
    #[error("agent '{0}' is inactive")]
    AgentInactive(String),

    /// A production write was attempted for a proposal whose impact was not
    /// validated.
    #[error("proposal '{0}' was not validated; refusing to apply")]
    NotValidated(String),

    /// An artifact (sandbox, result, plan) belongs to another agent or
    /// proposal.
    #[error("mismatched governance artifact: {0}")]
    ProposalMismatch(String),

    /// The change no longer fits the configuration it targets.
    #[error("change conflict: {0}")]
    ChangeConflict(String),

    /// The proposal is already moving through the pipeline.
    #[error("proposal '{0}' is already in flight")]
    ProposalInFlight(String),

    /// The sandbox run aborted on execution errors.
    #[error("sandbox run for proposal '{proposal_id}' aborted after {errors} error(s)")]
    SandboxAborted {
        /// Proposal under trial.
        proposal_id: String,
        /// Number of recorded execution errors.
        errors: usize,
    },

    /// A storage backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An illegal proposal state transition.
    #[error(transparent)]
    Proposal(#[from] ProposalError),

    /// An approval workflow operation failed.
    #[error(transparent)]
    Approval(#[from] gate::ApprovalError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
