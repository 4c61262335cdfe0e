//! Manually advanced clock for deterministic control-loop runs.

use kiln_shared::Clock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Simulated monotonic clock. Cloning shares the underlying time source,
/// so every task driven from one `SimClock` sees the same instant.
#[derive(Debug, Clone)]
pub struct SimClock {
    now_us: Arc<AtomicI64>,
    /// Wall-clock origin mapped onto monotonic zero.
    epoch_origin_s: i64,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            now_us: Arc::new(AtomicI64::new(0)),
            epoch_origin_s: 1_700_000_000,
        }
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now_us.fetch_add(ms * 1000, Ordering::SeqCst);
    }

    pub fn advance_us(&self, us: i64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn monotonic_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn wallclock_epoch_s(&self) -> i64 {
        self.epoch_origin_s + self.now_us.load(Ordering::SeqCst) / 1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_time_source() {
        let a = SimClock::new();
        let b = a.clone();
        a.advance_ms(1500);
        assert_eq!(b.monotonic_us(), 1_500_000);
        assert_eq!(b.wallclock_epoch_s(), 1_700_000_001);
    }
}
