//! Time source for write stamps and expiry checks.

use chrono::Utc;
use memoir_core::Timestamp;

/// Source of the current time. Swappable so expiry is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
