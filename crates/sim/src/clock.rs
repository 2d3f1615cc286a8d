//! Clocks for simulation and tests.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use thermal::traits::Clock;

/// A wall clock that runs `speedup` times faster than real time. A 12-hour
/// firing with `speedup = 100` completes in about seven minutes of real time,
/// while the engine still observes schedule-true timestamps.
#[derive(Debug, Clone)]
pub struct SimClock {
    origin: Instant,
    speedup: f64,
}

impl SimClock {
    pub fn new(speedup: f64) -> Self {
        assert!(speedup > 0.0, "speedup must be positive");
        Self {
            origin: Instant::now(),
            speedup,
        }
    }
}

impl Clock for SimClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * self.speedup
    }

    fn sleep(&self, secs: f64) {
        if secs > 0.0 {
            std::thread::sleep(std::time::Duration::from_secs_f64(secs / self.speedup));
        }
    }
}

/// A fully virtual clock: `sleep` advances time instantly. Lets tests step
/// through half-hour interlock windows without waiting for anything.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward without sleeping.
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }

    fn sleep(&self, secs: f64) {
        if secs > 0.0 {
            self.advance(secs);
        }
    }
}
