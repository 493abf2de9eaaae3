//! # Impact Measurement
//!
//! ## Responsibility
//! Decide empirically whether a sandboxed change helped, by comparing a
//! fixed-length baseline period against a fixed-length test period, and
//! condense the outcome into durable [`ImpactMetrics`] plus an ROI summary.
//!
//! ## Guarantees
//! - Both periods are exactly [`MEASUREMENT_PERIOD_DAYS`] long.
//! - Improvement deltas derive only from the two period aggregates; daily
//!   snapshots are diagnostic.
//! - A reliability regression beyond tolerance vetoes the improvement
//!   regardless of cost or speed gains.
//!
//! ## NOT Responsible For
//! - Running the sandbox (see `sandbox`)
//! - Scoring capability gain (see `scoring`)

pub mod measurer;
pub mod roi;
pub mod types;

pub use measurer::{compute_improvements, validate_improvements, ImpactConfig, ImpactMeasurer};
pub use roi::{calculate_roi, RoiCalculation, RoiConfig};
pub use types::{
    DailyMeasurement, ImpactMeasurementResult, ImpactMetrics, ImprovementDeltas, PeriodMetrics,
    ValidationStatus, MEASUREMENT_PERIOD_DAYS,
};
