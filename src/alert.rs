//! # Alerts & Notifications
//!
//! ## Responsibility
//! Represent human-readable velocity and gate alerts together with the
//! numeric fields needed to reconstruct the triggering condition, and route
//! them to a notification sink.
//!
//! ## Guarantees
//! - Every alert carries its own `raised_at` instant; delivery order is not
//!   guaranteed to match generation order.
//! - Notification is fire-and-forget: sinks never return errors to the
//!   governance pipeline.
//!
//! ## NOT Responsible For
//! - Transport (console/Slack/email delivery is external)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational.
    Info,
    /// Needs attention.
    Warning,
    /// Needs immediate action.
    Critical,
}

impl AlertSeverity {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// What triggered an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Capability gain per day exceeded the rapid-growth threshold.
    RapidGrowth,
    /// Velocity rose faster than the acceleration threshold.
    Acceleration,
    /// Velocity fell faster than the acceleration threshold.
    Deceleration,
    /// A gate check found growth above the ceiling.
    GateViolation,
    /// A pre-commit check blocked an improvement.
    ImprovementBlocked,
}

/// A single alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier.
    pub id: String,
    /// Agent the alert concerns.
    pub agent_id: String,
    /// Trigger category.
    pub kind: AlertKind,
    /// Severity level.
    pub severity: AlertSeverity,
    /// Human-readable message.
    pub message: String,
    /// Observed (or projected) capability gain per day.
    pub current_rate: f64,
    /// Threshold the rate was compared against.
    pub threshold: f64,
    /// Window-over-window change in rate, in percent, when known.
    pub acceleration_percent: Option<f64>,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Build an alert with a fresh id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        current_rate: f64,
        threshold: f64,
        acceleration_percent: Option<f64>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("alert-{}", Uuid::new_v4()),
            agent_id: agent_id.into(),
            kind,
            severity,
            message: message.into(),
            current_rate,
            threshold,
            acceleration_percent,
            raised_at,
        }
    }
}

/// Destination for alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `alert`. Failures are the sink's concern.
    async fn notify(&self, alert: &Alert);
}

/// Notifier that turns alerts into `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Info => info!(
                agent_id = %alert.agent_id,
                kind = ?alert.kind,
                rate = alert.current_rate,
                threshold = alert.threshold,
                acceleration_pct = ?alert.acceleration_percent,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                agent_id = %alert.agent_id,
                kind = ?alert.kind,
                rate = alert.current_rate,
                threshold = alert.threshold,
                acceleration_pct = ?alert.acceleration_percent,
                "{}",
                alert.message
            ),
            AlertSeverity::Critical => error!(
                agent_id = %alert.agent_id,
                kind = ?alert.kind,
                rate = alert.current_rate,
                threshold = alert.threshold,
                acceleration_pct = ?alert.acceleration_percent,
                "{}",
                alert.message
            ),
        }
    }
}
