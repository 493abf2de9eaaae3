//! # In-Memory Collaborators
//!
//! In-process implementations of every external interface in [`crate::store`].
//! Used by tests and by embedders that have not wired a durable backend yet.
//!
//! ## Backing store
//! `parking_lot::Mutex` / `RwLock` around plain collections, `DashMap` for the
//! agent registry. All handles are `Clone` and share state.
//!
//! ## Retention
//! The general record history is capped (oldest dropped first). The per-agent
//! impact log is append-only and never truncated: velocity recomputation must
//! always see every entry.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{
    AgentConfig, AgentRecord, AgentRegistry, GovernanceRecord, GovernanceStore, MetricsStore,
    ProductionState, RecordEnvelope, StoreError,
};
use crate::alert::{Alert, Notifier};
use crate::impact::ImpactMetrics;

// ─── Metrics store ────────────────────────────────────────────────────────────

/// One observed agent operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSample {
    /// Agent that ran the operation.
    pub agent_id: String,
    /// When the operation completed.
    pub timestamp: DateTime<Utc>,
    /// Wall time, in milliseconds.
    pub latency_ms: f64,
    /// Spend, in cents.
    pub cost_cents: f64,
    /// Whether the operation succeeded.
    pub success: bool,
}

/// Telemetry store holding raw operation samples.
#[derive(Clone, Default)]
pub struct InMemoryMetricsStore {
    samples: Arc<RwLock<Vec<OperationSample>>>,
}

impl InMemoryMetricsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single operation.
    pub fn record(&self, sample: OperationSample) {
        self.samples.write().push(sample);
    }

    /// Record many operations at once.
    pub fn record_many(&self, samples: impl IntoIterator<Item = OperationSample>) {
        self.samples.write().extend(samples);
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    /// Return `true` if no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    fn window(&self, agent_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<OperationSample> {
        self.samples
            .read()
            .iter()
            .filter(|s| s.agent_id == agent_id && s.timestamp >= start && s.timestamp < end)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn average_latency_ms(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let w = self.window(agent_id, start, end);
        if w.is_empty() {
            return Ok(0.0);
        }
        Ok(w.iter().map(|s| s.latency_ms).sum::<f64>() / w.len() as f64)
    }

    async fn total_cost_cents(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        Ok(self
            .window(agent_id, start, end)
            .iter()
            .map(|s| s.cost_cents)
            .sum())
    }

    async fn success_rate(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let w = self.window(agent_id, start, end);
        if w.is_empty() {
            return Ok(0.0);
        }
        Ok(w.iter().filter(|s| s.success).count() as f64 / w.len() as f64)
    }

    async fn operation_count(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self.window(agent_id, start, end).len() as u64)
    }
}

// ─── Agent registry ───────────────────────────────────────────────────────────

/// Agent registry that also serves as production state.
///
/// Counts writes so tests can prove that sandbox runs never touch it.
#[derive(Clone, Default)]
pub struct InMemoryAgentRegistry {
    agents: Arc<DashMap<String, AgentRecord>>,
    writes: Arc<AtomicU64>,
}

impl InMemoryAgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an agent. Not counted as a production write.
    pub fn insert(&self, agent: AgentRecord) {
        self.agents.insert(agent.id.clone(), agent);
    }

    /// Current record for an agent.
    pub fn agent(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.get(agent_id).map(|a| a.value().clone())
    }

    /// Number of [`ProductionState::commit_config`] calls served.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self.agent(agent_id))
    }

    async fn installed_tools(&self, agent_id: &str) -> Result<Vec<String>, StoreError> {
        self.agents
            .get(agent_id)
            .map(|a| a.config.tools.clone())
            .ok_or_else(|| StoreError::AgentNotFound(agent_id.to_string()))
    }
}

#[async_trait]
impl ProductionState for InMemoryAgentRegistry {
    async fn commit_config(
        &self,
        agent_id: &str,
        expected: &AgentConfig,
        config: AgentConfig,
    ) -> Result<(), StoreError> {
        let mut agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::AgentNotFound(agent_id.to_string()))?;
        if agent.config != *expected {
            return Err(StoreError::Conflict(format!(
                "agent '{agent_id}' configuration changed since it was read"
            )));
        }
        agent.config = config;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Governance store ─────────────────────────────────────────────────────────

struct GovernanceInner {
    records: VecDeque<RecordEnvelope>,
    impact_logs: HashMap<String, Vec<ImpactMetrics>>,
    max_records: usize,
}

/// Governance record sink and impact log.
#[derive(Clone)]
pub struct InMemoryGovernanceStore {
    inner: Arc<Mutex<GovernanceInner>>,
}

impl Default for InMemoryGovernanceStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemoryGovernanceStore {
    /// Create a store retaining at most `max_records` general records.
    pub fn new(max_records: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GovernanceInner {
                records: VecDeque::new(),
                impact_logs: HashMap::new(),
                max_records: max_records.max(1),
            })),
        }
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> Vec<RecordEnvelope> {
        self.inner.lock().records.iter().cloned().collect()
    }

    /// Retained records whose `type` discriminator equals `record_type`.
    pub fn records_of_type(&self, record_type: &str) -> Vec<RecordEnvelope> {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|r| r.record.record_type() == record_type)
            .cloned()
            .collect()
    }

    /// Append directly to an agent's impact log without going through
    /// [`GovernanceStore::save_record`]. Handy for seeding history.
    pub fn seed_impact(&self, metrics: ImpactMetrics) {
        self.inner
            .lock()
            .impact_logs
            .entry(metrics.agent_id.clone())
            .or_default()
            .push(metrics);
    }
}

#[async_trait]
impl GovernanceStore for InMemoryGovernanceStore {
    async fn save_record(&self, envelope: RecordEnvelope) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let GovernanceRecord::ImpactMetrics(m) = &envelope.record {
            inner
                .impact_logs
                .entry(m.agent_id.clone())
                .or_default()
                .push(m.clone());
        }
        if inner.records.len() >= inner.max_records {
            inner.records.pop_front();
        }
        inner.records.push_back(envelope);
        Ok(())
    }

    async fn impact_log(&self, agent_id: &str) -> Result<Vec<ImpactMetrics>, StoreError> {
        Ok(self
            .inner
            .lock()
            .impact_logs
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ─── Notifier ─────────────────────────────────────────────────────────────────

/// Notifier that keeps every alert it receives.
#[derive(Clone, Default)]
pub struct CollectingNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl CollectingNotifier {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far, in delivery order.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}
