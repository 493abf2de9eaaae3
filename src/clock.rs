//! # Time Source
//!
//! ## Responsibility
//! Provide "now" to every windowed computation so that measurement windows
//! can be driven by the wall clock in production and by a synthetic clock in
//! tests.
//!
//! ## Guarantees
//! - `SystemClock` is stateless and always returns UTC wall-clock time.
//! - `ManualClock` never moves unless told to; clones share the same instant.
//!
//! ## NOT Responsible For
//! - Scheduling (the caller decides when pipelines run)

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Return the current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when advanced explicitly.
///
/// Cheap to clone; all clones observe the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward (or backward, for negative durations).
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Shared clock handle used by every service object.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the production clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
