//! # External Collaborators
//!
//! ## Responsibility
//! Define the narrow interfaces through which the governor reads telemetry
//! and agent state, writes production configuration, persists governance
//! records, and emits notifications.
//!
//! ## Guarantees
//! - Reads and writes of agent state are split: [`AgentRegistry`] is
//!   read-only, [`ProductionState`] is the only write path.
//! - Production writes are compare-and-swap, so concurrent writers never
//!   silently overwrite each other.
//! - Every persisted record is wrapped in a [`RecordEnvelope`] carrying a
//!   `type` discriminator and a timestamp, so delivery order can be
//!   reconstructed.
//! - The impact log returned by [`GovernanceStore::impact_log`] is a
//!   consistent snapshot of an append-only sequence.
//!
//! ## NOT Responsible For
//! - Storage engine details (see [`memory`] for the in-process backing)
//! - Notification transport (console/Slack/email are external)

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alert::Alert;
use crate::gate::{ApprovalRequest, GateViolation};
use crate::impact::ImpactMetrics;

pub use memory::{
    CollectingNotifier, InMemoryAgentRegistry, InMemoryGovernanceStore, InMemoryMetricsStore,
    OperationSample,
};

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors surfaced by external collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached or returned an error.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The requested agent does not exist.
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    /// A record could not be encoded for storage.
    #[error("record serialization failed: {0}")]
    Serialization(String),

    /// A conditional write found state other than the caller expected.
    #[error("write conflict: {0}")]
    Conflict(String),
}

// ─── Agent state ──────────────────────────────────────────────────────────────

/// The subset of agent configuration a self-modification may touch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifier of the active model.
    pub model_id: String,
    /// Installed tool names.
    pub tools: Vec<String>,
    /// Tunable numeric parameters.
    pub parameters: BTreeMap<String, f64>,
    /// High-level execution strategy.
    pub strategy: String,
}

/// An agent as known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique agent identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Inactive agents cannot be trialled or modified.
    pub active: bool,
    /// Current production configuration.
    pub config: AgentConfig,
}

// ─── Read interfaces ──────────────────────────────────────────────────────────

/// Aggregate telemetry for an agent over a half-open window `[start, end)`.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Mean latency per operation, in milliseconds.
    async fn average_latency_ms(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError>;

    /// Total spend, in cents.
    async fn total_cost_cents(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError>;

    /// Fraction of operations that succeeded, in `[0, 1]`.
    async fn success_rate(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError>;

    /// Number of operations.
    async fn operation_count(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// Read-only view of the agent registry.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Fetch an agent record, `None` if it does not exist.
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError>;

    /// Names of the tools installed on an agent.
    async fn installed_tools(&self, agent_id: &str) -> Result<Vec<String>, StoreError>;
}

// ─── Write interfaces ─────────────────────────────────────────────────────────

/// Write access to production agent configuration.
#[async_trait]
pub trait ProductionState: AgentRegistry {
    /// Replace an agent's production configuration, provided it still equals
    /// `expected`.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if another writer changed the configuration
    /// after `expected` was read; nothing is written in that case.
    async fn commit_config(
        &self,
        agent_id: &str,
        expected: &AgentConfig,
        config: AgentConfig,
    ) -> Result<(), StoreError>;
}

/// A governance artifact, discriminated by `type` when serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceRecord {
    /// A completed impact measurement.
    ImpactMetrics(ImpactMetrics),
    /// A gate ceiling violation.
    GateViolation(GateViolation),
    /// A request for human sign-off.
    ApprovalRequest(ApprovalRequest),
    /// A velocity trend alert.
    VelocityAlert(Alert),
    /// A gate decision alert.
    GateAlert(Alert),
}

impl GovernanceRecord {
    /// The `type` discriminator this record serializes with.
    pub fn record_type(&self) -> &'static str {
        match self {
            GovernanceRecord::ImpactMetrics(_) => "impact_metrics",
            GovernanceRecord::GateViolation(_) => "gate_violation",
            GovernanceRecord::ApprovalRequest(_) => "approval_request",
            GovernanceRecord::VelocityAlert(_) => "velocity_alert",
            GovernanceRecord::GateAlert(_) => "gate_alert",
        }
    }

    /// Agent the record belongs to.
    pub fn agent_id(&self) -> &str {
        match self {
            GovernanceRecord::ImpactMetrics(m) => &m.agent_id,
            GovernanceRecord::GateViolation(v) => &v.agent_id,
            GovernanceRecord::ApprovalRequest(r) => &r.agent_id,
            GovernanceRecord::VelocityAlert(a) | GovernanceRecord::GateAlert(a) => &a.agent_id,
        }
    }
}

/// A record plus the instant it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEnvelope {
    /// When the record was produced.
    pub timestamp: DateTime<Utc>,
    /// The record itself, flattened next to `timestamp`.
    #[serde(flatten)]
    pub record: GovernanceRecord,
}

impl RecordEnvelope {
    /// Wrap `record` with `timestamp`.
    pub fn new(timestamp: DateTime<Utc>, record: GovernanceRecord) -> Self {
        Self { timestamp, record }
    }
}

/// Durable sink for governance records and source of the impact log.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    /// Persist any governance record. `ImpactMetrics` records are appended
    /// to the agent's impact log.
    async fn save_record(&self, envelope: RecordEnvelope) -> Result<(), StoreError>;

    /// Snapshot of every `ImpactMetrics` entry recorded for `agent_id`, in
    /// append order.
    async fn impact_log(&self, agent_id: &str) -> Result<Vec<ImpactMetrics>, StoreError>;
}
