//! # Velocity Tracking
//!
//! ## Responsibility
//! Turn the append-only impact log into a rate of capability gain per day,
//! compare consecutive windows to detect acceleration, and raise alerts.
//!
//! ## Guarantees
//! - Pure folds: [`measure_velocity`] and [`analyze_velocity_trend`] depend
//!   only on their arguments, so recomputing from the log always reproduces
//!   the same view.
//! - Consecutive windows never share an entry: the current window is closed,
//!   the previous one excludes its end instant.
//! - Empty windows produce all-zero rates, never errors.
//!
//! ## NOT Responsible For
//! - Enforcing the ceiling (see `gate`)
//! - Storing velocity (it is recomputed on demand)

pub mod measure;
pub mod tracker;
pub mod trend;

pub use measure::{measure_velocity, measure_window, VelocityMeasurement, VelocityWindow};
pub use tracker::{VelocityReport, VelocityTracker};
pub use trend::{analyze_velocity_trend, VelocityConfig, VelocityTrend};
