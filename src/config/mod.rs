//! # Governor Configuration
//!
//! ## Responsibility
//! Parse, validate, and hot-reload the TOML file that sets governance
//! policy: sandbox limits, validation thresholds, ROI cost model, velocity
//! windows and the capability gate.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `GovernorConfig`
//! - Complete defaults: an empty file yields the stock policy
//! - Validated: semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Applying a reloaded config to running services (callers rebuild them)

pub mod loader;
pub mod validation;
#[cfg(feature = "hot-reload")]
pub mod watcher;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::gate::GateConfig;
use crate::impact::{ImpactConfig, RoiConfig};
use crate::sandbox::SandboxConfig;
use crate::velocity::VelocityConfig;

pub use loader::{load_from_file, load_from_str};
pub use validation::{validate, ConfigError};

// ── Top-level config ─────────────────────────────────────────────────────

/// Root governance configuration.
///
/// Every section is optional; omitted sections take the stock policy.
///
/// # Example
///
/// ```toml
/// [impact]
/// max_reliability_drop_pp = 5.0
///
/// [gate]
/// max_capability_gain_per_day = 10.0
/// enforce_gates = true
///
/// [observability]
/// log_format = "json"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GovernorConfig {
    /// Sandbox execution limits.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Validation thresholds for impact measurement.
    #[serde(default)]
    pub impact: ImpactConfig,
    /// ROI cost model.
    #[serde(default)]
    pub roi: RoiConfig,
    /// Velocity windows and alert thresholds.
    #[serde(default)]
    pub velocity: VelocityConfig,
    /// Capability gate policy.
    #[serde(default)]
    pub gate: GateConfig,
    /// Logging settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl GovernorConfig {
    /// JSON Schema of the config file, pretty-printed.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if schema serialization fails.
    pub fn json_schema() -> Result<String, serde_json::Error> {
        let schema = schemars::schema_for!(GovernorConfig);
        serde_json::to_string_pretty(&schema)
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Observability configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format. `LOG_FORMAT` in the environment takes precedence.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable log output.
    #[default]
    Pretty,
    /// Structured JSON log output.
    Json,
}
