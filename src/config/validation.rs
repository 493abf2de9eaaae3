//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`GovernorConfig`] that cannot
//! be expressed through the type system alone (range checks, cross-field
//! invariants between gate bands and sample sizes).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::GovernorConfig;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "gate.warning_band").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file watcher could not be started.
    #[error("Watch error: {0}")]
    Watch(String),
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on a [`GovernorConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &GovernorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Sandbox ──────────────────────────────────────────────────────
    let sandbox = &config.sandbox;
    if sandbox.max_sample_size == 0 {
        errors.push(invalid("sandbox.max_sample_size", 0, "must be at least 1"));
    }
    if sandbox.default_sample_size == 0 {
        errors.push(invalid("sandbox.default_sample_size", 0, "must be at least 1"));
    }
    if sandbox.default_sample_size > sandbox.max_sample_size {
        errors.push(invalid(
            "sandbox.default_sample_size",
            sandbox.default_sample_size,
            "must be \u{2264} max_sample_size",
        ));
    }
    if sandbox.sample_timeout_ms == 0 {
        errors.push(invalid("sandbox.sample_timeout_ms", 0, "must be at least 1ms"));
    }

    // ── Impact thresholds ────────────────────────────────────────────
    let impact = &config.impact;
    for (field, value) in [
        ("impact.min_cost_reduction_percent", impact.min_cost_reduction_percent),
        ("impact.min_speed_improvement_percent", impact.min_speed_improvement_percent),
        ("impact.min_reliability_improvement_pp", impact.min_reliability_improvement_pp),
        ("impact.max_reliability_drop_pp", impact.max_reliability_drop_pp),
    ] {
        if !value.is_finite() || value < 0.0 {
            errors.push(invalid(field, value, "must be a finite value \u{2265} 0"));
        }
    }

    // ── ROI cost model ───────────────────────────────────────────────
    let roi = &config.roi;
    if roi.projection_days == 0 {
        errors.push(invalid("roi.projection_days", 0, "must be at least 1 day"));
    }
    for (field, value) in [
        ("roi.model_switch_cost_cents", roi.model_switch_cost_cents),
        ("roi.parameter_tune_cost_cents", roi.parameter_tune_cost_cents),
        ("roi.tool_swap_cost_cents", roi.tool_swap_cost_cents),
        ("roi.strategy_update_cost_cents", roi.strategy_update_cost_cents),
    ] {
        if !value.is_finite() || value < 0.0 {
            errors.push(invalid(field, value, "cost must be a finite value \u{2265} 0"));
        }
    }

    // ── Velocity ─────────────────────────────────────────────────────
    let velocity = &config.velocity;
    if velocity.window_days == 0 {
        errors.push(invalid("velocity.window_days", 0, "must be at least 1 day"));
    }
    if !velocity.acceleration_threshold_percent.is_finite() || velocity.acceleration_threshold_percent < 0.0 {
        errors.push(invalid(
            "velocity.acceleration_threshold_percent",
            velocity.acceleration_threshold_percent,
            "must be a finite value \u{2265} 0",
        ));
    }
    if !velocity.rapid_growth_threshold.is_finite() || velocity.rapid_growth_threshold < 0.0 {
        errors.push(invalid(
            "velocity.rapid_growth_threshold",
            velocity.rapid_growth_threshold,
            "must be a finite value \u{2265} 0",
        ));
    }

    // ── Gate ─────────────────────────────────────────────────────────
    let gate = &config.gate;
    if !gate.max_capability_gain_per_day.is_finite() || gate.max_capability_gain_per_day <= 0.0 {
        errors.push(invalid(
            "gate.max_capability_gain_per_day",
            gate.max_capability_gain_per_day,
            "ceiling must be > 0",
        ));
    }
    if !gate.warning_band.is_finite() || gate.warning_band <= 0.0 {
        errors.push(invalid("gate.warning_band", gate.warning_band, "must be > 0"));
    }
    if !gate.blocked_band.is_finite() || gate.warning_band > gate.blocked_band {
        errors.push(invalid(
            "gate.blocked_band",
            gate.blocked_band,
            "must be \u{2265} warning_band",
        ));
    }
    if gate.max_tracked_approvals == 0 {
        errors.push(invalid("gate.max_tracked_approvals", 0, "must be \u{2265} 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(errors: &[ConfigError]) -> Vec<String> {
        errors
            .iter()
            .filter_map(|e| match e {
                ConfigError::InvalidField { field, .. } => Some(field.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&GovernorConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let mut cfg = GovernorConfig::default();
        cfg.gate.max_capability_gain_per_day = 0.0;
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(fields(&errs), vec!["gate.max_capability_gain_per_day"]);
    }

    #[test]
    fn test_band_ordering_enforced() {
        let mut cfg = GovernorConfig::default();
        cfg.gate.warning_band = 0.6;
        cfg.gate.blocked_band = 0.5;
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(fields(&errs), vec!["gate.blocked_band"]);
    }

    #[test]
    fn test_zero_warning_band_rejected() {
        let mut cfg = GovernorConfig::default();
        cfg.gate.warning_band = 0.0;
        assert!(fields(&validate(&cfg).unwrap_err()).contains(&"gate.warning_band".to_string()));
    }

    #[test]
    fn test_zero_approval_capacity_rejected() {
        let mut cfg = GovernorConfig::default();
        cfg.gate.max_tracked_approvals = 0;
        assert_eq!(fields(&validate(&cfg).unwrap_err()), vec!["gate.max_tracked_approvals"]);
    }

    #[test]
    fn test_negative_thresholds_rejected() {
        let mut cfg = GovernorConfig::default();
        cfg.impact.max_reliability_drop_pp = -1.0;
        cfg.velocity.rapid_growth_threshold = -0.5;
        cfg.velocity.acceleration_threshold_percent = f64::NAN;
        let f = fields(&validate(&cfg).unwrap_err());
        assert!(f.contains(&"impact.max_reliability_drop_pp".to_string()));
        assert!(f.contains(&"velocity.rapid_growth_threshold".to_string()));
        assert!(f.contains(&"velocity.acceleration_threshold_percent".to_string()));
    }

    #[test]
    fn test_sandbox_sizes() {
        let mut cfg = GovernorConfig::default();
        cfg.sandbox.max_sample_size = 50;
        cfg.sandbox.default_sample_size = 100;
        cfg.sandbox.sample_timeout_ms = 0;
        let f = fields(&validate(&cfg).unwrap_err());
        assert_eq!(f, vec!["sandbox.default_sample_size", "sandbox.sample_timeout_ms"]);
    }

    #[test]
    fn test_zero_windows_rejected() {
        let mut cfg = GovernorConfig::default();
        cfg.velocity.window_days = 0;
        cfg.roi.projection_days = 0;
        cfg.roi.tool_swap_cost_cents = -5.0;
        let f = fields(&validate(&cfg).unwrap_err());
        assert!(f.contains(&"velocity.window_days".to_string()));
        assert!(f.contains(&"roi.projection_days".to_string()));
        assert!(f.contains(&"roi.tool_swap_cost_cents".to_string()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut cfg = GovernorConfig::default();
        cfg.gate.max_capability_gain_per_day = -1.0;
        cfg.sandbox.max_sample_size = 0;
        cfg.velocity.window_days = 0;
        let errs = validate(&cfg).unwrap_err();
        assert!(errs.len() >= 3);
    }

    #[test]
    fn test_error_message_names_field_and_value() {
        let err = invalid("gate.warning_band", -0.1, "must be > 0");
        let msg = err.to_string();
        assert!(msg.contains("gate.warning_band"));
        assert!(msg.contains("-0.1"));
    }
}
