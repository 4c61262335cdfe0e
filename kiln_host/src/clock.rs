//! System clock implementation of the shared `Clock` trait.

use kiln_shared::Clock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic time from `Instant`, wall time from `SystemTime`.
#[derive(Debug)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn monotonic_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }

    fn wallclock_epoch_s(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}
