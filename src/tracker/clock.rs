//! Time sources for event stamping

use chrono::Utc;
use std::cell::Cell;
use std::rc::Rc;

/// Supplies wall-clock milliseconds for emitted events
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        Utc::now().timestamp_millis() as f64
    }
}

/// Clock that only moves when told to. Clones share the same time.
///
/// Used when replaying recorded sessions and in tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        ManualClock {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: f64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(100.0);
        let handle = clock.clone();
        handle.advance(250.0);
        assert_eq!(clock.now_ms(), 350.0);

        clock.set(5.0);
        assert_eq!(handle.now_ms(), 5.0);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000.0);
    }
}
