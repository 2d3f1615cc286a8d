//! Capability seams between the control loop and its environment.
//!
//! The firing engine is generic over these three traits so the identical
//! control code drives a real kiln (GPIO relay, SPI thermocouple, wall clock)
//! or a simulated one (thermodynamic model, sped-up clock) in tests.

use std::time::Instant;

/// A source of smoothed temperature readings in the system scale.
///
/// Implementations publish the latest sliding-median value from wherever the
/// sampling actually happens (a background thread for real hardware, the
/// model state for a simulation). Reads must be cheap; the control loop calls
/// this several times per tick.
pub trait TemperatureSource: Send {
    /// The current smoothed temperature.
    fn temperature(&self) -> f64;

    /// True when the sensor's recent error rate exceeds the safety limit.
    fn over_error_limit(&self) -> bool {
        false
    }
}

/// Something that turns heat into the kiln: a solid-state relay in production,
/// the simulation model in tests.
pub trait HeatSink: Send {
    /// Applies one control tick: the element is on for `duty * tick` seconds
    /// and off for the remainder. Blocks for the tick duration (real time for
    /// hardware, scaled time for a simulation), which is what paces the
    /// control loop.
    fn apply(&mut self, duty: f64, tick_secs: f64);

    /// Unconditionally deasserts the heater. Called on every path that leaves
    /// RUNNING, before the final snapshot is written.
    fn off(&mut self);
}

/// Time for the control loop: monotonic seconds plus sleeping.
pub trait Clock: Send {
    /// Seconds since an arbitrary fixed origin. Monotonic.
    fn now(&self) -> f64;

    /// Sleeps for `secs` of *this clock's* time (a sped-up simulation clock
    /// sleeps proportionally less wall time).
    fn sleep(&self, secs: f64);
}

/// The production clock: monotonic wall time, real sleeps.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn sleep(&self, secs: f64) {
        if secs > 0.0 {
            std::thread::sleep(std::time::Duration::from_secs_f64(secs));
        }
    }
}
