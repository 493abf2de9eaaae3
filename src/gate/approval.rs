//! # Approval Workflow
//!
//! ## Responsibility
//! Track human sign-off for gate crossings: create requests, resolve them,
//! and hand out the one-time exception an approval grants.
//!
//! ## Guarantees
//! - State is a tagged enum: a request can never be approved and pending at
//!   once.
//! - Append-only: a resolved request is never reopened. A fresh violation
//!   produces a fresh request.
//! - An approval is consumed by exactly one subsequent pre-commit check for
//!   the same improvement. It never raises the ceiling.
//! - Memory is bounded. Past capacity the oldest settled request (rejected,
//!   or approved with nothing left to grant) is evicted first; pending
//!   requests go only when nothing settled remains. Every request is also
//!   persisted by the gate, so eviction drops the in-memory copy only.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::violation::GateViolation;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors produced by the approval workflow.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// No request with this id.
    #[error("approval request '{0}' not found")]
    NotFound(String),

    /// The request was already approved or rejected.
    #[error("approval request '{request_id}' already resolved as {status}")]
    AlreadyResolved {
        /// The request that was targeted.
        request_id: String,
        /// Its final status.
        status: &'static str,
    },
}

// ─── Status ───────────────────────────────────────────────────────────────────

/// Lifecycle state of an approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a reviewer.
    Pending,
    /// Crossing allowed once.
    Approved {
        /// Who approved.
        reviewer: String,
        /// When.
        resolved_at: DateTime<Utc>,
        /// Optional reviewer notes.
        notes: Option<String>,
    },
    /// Crossing refused.
    Rejected {
        /// Who rejected.
        reviewer: String,
        /// When.
        resolved_at: DateTime<Utc>,
        /// Why.
        reason: String,
    },
}

impl ApprovalStatus {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved { .. } => "approved",
            ApprovalStatus::Rejected { .. } => "rejected",
        }
    }

    /// Return `true` unless pending.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// Default number of requests an [`ApprovalWorkflow`] keeps in memory.
pub const DEFAULT_MAX_TRACKED_APPROVALS: usize = 1_000;

// ─── Request ──────────────────────────────────────────────────────────────────

/// A request for human sign-off on one gate crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// `appr-<uuid>`.
    pub id: String,
    /// Agent that crossed.
    pub agent_id: String,
    /// Violation that triggered the request.
    pub violation_id: String,
    /// Improvement the exception would cover (pre-commit crossings only).
    pub improvement_id: Option<String>,
    /// Growth rate that crossed.
    pub requested_rate: f64,
    /// Ceiling in force.
    pub ceiling: f64,
    /// Current state.
    pub status: ApprovalStatus,
    /// When the request was opened.
    pub created_at: DateTime<Utc>,
    /// Whether an approval has already been used.
    pub exception_consumed: bool,
}

impl ApprovalRequest {
    /// Return `true` once the request can no longer change or grant anything.
    pub fn is_settled(&self) -> bool {
        match self.status {
            ApprovalStatus::Pending => false,
            ApprovalStatus::Rejected { .. } => true,
            ApprovalStatus::Approved { .. } => self.improvement_id.is_none() || self.exception_consumed,
        }
    }
}

// ─── Workflow ─────────────────────────────────────────────────────────────────

struct WorkflowInner {
    requests: HashMap<String, ApprovalRequest>,
    order: VecDeque<String>,
    /// Unconsumed approvals keyed by `(agent_id, improvement_id)`.
    grants: HashMap<(String, String), VecDeque<String>>,
    capacity: usize,
}

impl WorkflowInner {
    fn evict_over_capacity(&mut self) {
        while self.requests.len() > self.capacity {
            let pos = self
                .order
                .iter()
                .position(|id| self.requests.get(id).map_or(true, ApprovalRequest::is_settled))
                .unwrap_or(0);
            let Some(id) = self.order.remove(pos) else {
                return;
            };
            if let Some(evicted) = self.requests.remove(&id) {
                if !evicted.is_settled() {
                    warn!(
                        request_id = %id,
                        agent_id = %evicted.agent_id,
                        status = evicted.status.as_str(),
                        "approval capacity reached, evicting unsettled request"
                    );
                }
            }
        }
    }
}

/// In-process approval registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    inner: Arc<Mutex<WorkflowInner>>,
}

impl Default for ApprovalWorkflow {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_TRACKED_APPROVALS)
    }
}

impl ApprovalWorkflow {
    /// Create an empty workflow with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty workflow holding at most `capacity` requests.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WorkflowInner {
                requests: HashMap::new(),
                order: VecDeque::new(),
                grants: HashMap::new(),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Number of requests held in memory.
    pub fn len(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Return `true` if no requests are held.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().requests.is_empty()
    }

    /// Open a pending request for `violation`.
    pub fn create_approval_request(&self, violation: &GateViolation, now: DateTime<Utc>) -> ApprovalRequest {
        let request = ApprovalRequest {
            id: format!("appr-{}", Uuid::new_v4()),
            agent_id: violation.agent_id.clone(),
            violation_id: violation.id.clone(),
            improvement_id: violation.improvement_id().map(str::to_string),
            requested_rate: violation.growth_rate,
            ceiling: violation.ceiling,
            status: ApprovalStatus::Pending,
            created_at: now,
            exception_consumed: false,
        };
        let mut inner = self.inner.lock();
        inner.order.push_back(request.id.clone());
        inner.requests.insert(request.id.clone(), request.clone());
        inner.evict_over_capacity();
        crate::metrics::record_approval("pending");
        info!(
            request_id = %request.id,
            agent_id = %request.agent_id,
            violation_id = %request.violation_id,
            rate = request.requested_rate,
            ceiling = request.ceiling,
            "approval request created"
        );
        request
    }

    /// Approve a pending request.
    ///
    /// # Errors
    /// [`ApprovalError::NotFound`] or [`ApprovalError::AlreadyResolved`].
    pub fn approve_gate_crossing(
        &self,
        request_id: &str,
        reviewer: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.resolve(
            request_id,
            ApprovalStatus::Approved {
                reviewer: reviewer.to_string(),
                resolved_at: now,
                notes,
            },
        )
    }

    /// Reject a pending request.
    ///
    /// # Errors
    /// [`ApprovalError::NotFound`] or [`ApprovalError::AlreadyResolved`].
    pub fn reject_gate_crossing(
        &self,
        request_id: &str,
        reviewer: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.resolve(
            request_id,
            ApprovalStatus::Rejected {
                reviewer: reviewer.to_string(),
                resolved_at: now,
                reason: reason.to_string(),
            },
        )
    }

    fn resolve(&self, request_id: &str, status: ApprovalStatus) -> Result<ApprovalRequest, ApprovalError> {
        let mut inner = self.inner.lock();
        let request = inner
            .requests
            .get_mut(request_id)
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))?;
        if request.status.is_resolved() {
            return Err(ApprovalError::AlreadyResolved {
                request_id: request_id.to_string(),
                status: request.status.as_str(),
            });
        }
        request.status = status;
        let resolved = request.clone();
        crate::metrics::record_approval(resolved.status.as_str());
        info!(
            request_id = %request_id,
            agent_id = %resolved.agent_id,
            status = resolved.status.as_str(),
            "approval request resolved"
        );
        if let (ApprovalStatus::Approved { .. }, Some(improvement_id)) = (&resolved.status, &resolved.improvement_id) {
            inner
                .grants
                .entry((resolved.agent_id.clone(), improvement_id.clone()))
                .or_default()
                .push_back(resolved.id.clone());
        }
        Ok(resolved)
    }

    /// Use up an unconsumed approval covering `improvement_id` for
    /// `agent_id`, if one exists.
    pub fn consume_exception(&self, agent_id: &str, improvement_id: &str) -> Option<ApprovalRequest> {
        let mut inner = self.inner.lock();
        let WorkflowInner { requests, grants, .. } = &mut *inner;
        let key = (agent_id.to_string(), improvement_id.to_string());
        let queue = grants.get_mut(&key)?;
        let mut granted = None;
        // Ids of evicted requests are skipped.
        while let Some(id) = queue.pop_front() {
            if let Some(request) = requests.get_mut(&id) {
                request.exception_consumed = true;
                granted = Some(request.clone());
                break;
            }
        }
        if queue.is_empty() {
            grants.remove(&key);
        }
        let request = granted?;
        info!(request_id = %request.id, improvement_id = %improvement_id, "one-time gate exception consumed");
        Some(request)
    }

    /// Look up a request.
    pub fn get(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.inner.lock().requests.get(request_id).cloned()
    }

    /// Pending requests for `agent_id`, oldest first.
    pub fn pending(&self, agent_id: &str) -> Vec<ApprovalRequest> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.requests.get(id))
            .filter(|r| r.agent_id == agent_id && r.status == ApprovalStatus::Pending)
            .cloned()
            .collect()
    }
}
