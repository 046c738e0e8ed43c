use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Device time sources: the adjustable wall clock and a monotonic uptime.
///
/// Reference times are anchored on uptime so that a wall clock change after a
/// fetch does not also shift the reference.
pub trait DeviceClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn uptime(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}
