//! Injected time source so grace windows and day boundaries are testable
//! without wall-clock sleeps.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time; the production implementation.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
