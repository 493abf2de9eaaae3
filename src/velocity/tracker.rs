//! Velocity tracking service: reads the impact log, measures the current and
//! preceding windows, and raises alerts.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::measure::{measure_window, VelocityMeasurement, VelocityWindow};
use super::trend::{analyze_velocity_trend, VelocityConfig, VelocityTrend};
use crate::alert::{Alert, AlertKind, AlertSeverity, Notifier};
use crate::clock::SharedClock;
use crate::gate::{classify_excess, GateConfig, ViolationSeverity};
use crate::store::{GovernanceRecord, GovernanceStore, RecordEnvelope, StoreError};

/// Everything one tracking pass produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityReport {
    /// Closed window `[now − N days, now]`.
    pub current: VelocityMeasurement,
    /// Half-open window `[now − 2N days, now − N days)`.
    pub previous: VelocityMeasurement,
    /// Comparison of the two.
    pub trend: VelocityTrend,
    /// Alerts raised (already persisted and notified).
    pub alerts: Vec<Alert>,
}

/// Computes per-agent velocity on demand. Holds no velocity state of its
/// own: every call recomputes from the log.
#[derive(Clone)]
pub struct VelocityTracker {
    store: Arc<dyn GovernanceStore>,
    notifier: Arc<dyn Notifier>,
    clock: SharedClock,
    config: VelocityConfig,
    /// `(warning_band, blocked_band)` used to grade rapid-growth alerts.
    bands: (f64, f64),
}

impl VelocityTracker {
    /// Create a tracker grading alerts with the default gate bands.
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
        config: VelocityConfig,
    ) -> Self {
        let gate = GateConfig::default();
        Self {
            store,
            notifier,
            clock,
            config,
            bands: (gate.warning_band, gate.blocked_band),
        }
    }

    /// Grade rapid-growth alerts with the gate's excess bands, so an alert
    /// is critical exactly when the gate would call the same excess critical.
    pub fn with_severity_bands(mut self, warning_band: f64, blocked_band: f64) -> Self {
        self.bands = (warning_band, blocked_band);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &VelocityConfig {
        &self.config
    }

    /// Velocity over the current window only. Raises no alerts.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the impact log cannot be read.
    pub async fn current_velocity(&self, agent_id: &str) -> Result<VelocityMeasurement, StoreError> {
        let log = self.store.impact_log(agent_id).await?;
        let (current, _) = self.windows();
        Ok(measure_window(agent_id, &log, current))
    }

    /// Measure the current and preceding windows, analyse the trend, and
    /// persist and notify any alerts.
    ///
    /// Alert persistence is fire-and-forget: a failed write is logged and
    /// does not fail the call.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the impact log cannot be read.
    pub async fn track_improvement_velocity(&self, agent_id: &str) -> Result<VelocityReport, StoreError> {
        let log = self.store.impact_log(agent_id).await?;
        let (current_window, previous_window) = self.windows();
        let current = measure_window(agent_id, &log, current_window);
        let previous = measure_window(agent_id, &log, previous_window);
        let trend = analyze_velocity_trend(&current, Some(&previous), &self.config);

        let alerts = self.alerts_for(&trend);
        for alert in &alerts {
            let envelope = RecordEnvelope::new(alert.raised_at, GovernanceRecord::VelocityAlert(alert.clone()));
            if let Err(e) = self.store.save_record(envelope).await {
                warn!(agent_id = %agent_id, alert_id = %alert.id, error = %e, "failed to persist velocity alert");
            }
            self.notifier.notify(alert).await;
        }

        info!(
            agent_id = %agent_id,
            rate = current.capability_gain_per_day,
            previous_rate = previous.capability_gain_per_day,
            acceleration_pct = trend.acceleration_percent,
            improvements = current.improvements_in_window,
            alerts = alerts.len(),
            "velocity tracked"
        );

        Ok(VelocityReport {
            current,
            previous,
            trend,
            alerts,
        })
    }

    fn windows(&self) -> (VelocityWindow, VelocityWindow) {
        let now = self.clock.now();
        let len = Duration::days(i64::from(self.config.window_days));
        (
            VelocityWindow::closed(now - len, now),
            VelocityWindow::half_open(now - len - len, now - len),
        )
    }

    fn alerts_for(&self, trend: &VelocityTrend) -> Vec<Alert> {
        let now = self.clock.now();
        let threshold = self.config.rapid_growth_threshold;
        let accel_threshold = self.config.acceleration_threshold_percent;
        let mut alerts = Vec::new();

        if trend.is_rapid_growth {
            let (warning_band, blocked_band) = self.bands;
            let severity = match classify_excess(trend.current_rate, threshold, warning_band, blocked_band) {
                Some(ViolationSeverity::Critical) => AlertSeverity::Critical,
                _ => AlertSeverity::Warning,
            };
            alerts.push(Alert::new(
                &trend.agent_id,
                AlertKind::RapidGrowth,
                severity,
                format!(
                    "Rapid capability growth: {:.2}%/day exceeds {:.2}%/day",
                    trend.current_rate, threshold
                ),
                trend.current_rate,
                threshold,
                trend.previous_rate.map(|_| trend.acceleration_percent),
                now,
            ));
        }
        if trend.is_accelerating {
            alerts.push(Alert::new(
                &trend.agent_id,
                AlertKind::Acceleration,
                AlertSeverity::Warning,
                format!(
                    "Capability growth accelerating: {:+.1}% window over window (threshold {:.1}%)",
                    trend.acceleration_percent, accel_threshold
                ),
                trend.current_rate,
                accel_threshold,
                Some(trend.acceleration_percent),
                now,
            ));
        }
        if trend.is_decelerating {
            alerts.push(Alert::new(
                &trend.agent_id,
                AlertKind::Deceleration,
                AlertSeverity::Info,
                format!(
                    "Capability growth decelerating: {:+.1}% window over window",
                    trend.acceleration_percent
                ),
                trend.current_rate,
                accel_threshold,
                Some(trend.acceleration_percent),
                now,
            ));
        }
        alerts
    }
}
