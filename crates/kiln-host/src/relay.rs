//! Solid-State Relay Output
//!
//! Drives the GPIO line switching the kiln's heating elements. Some SSR
//! boards are active-low, so the line polarity is configurable. `heat` and
//! `cool` block for their duration: the line always reflects the most recent
//! command, and the blocking is what paces the control loop to its tick.
//!
//! A failed pin write is logged and surfaced to the heat-rate deviation
//! warning by its effect, never escalated — one bad write must not take the
//! controller down mid-firing.

use embedded_hal::digital::OutputPin;
use std::thread;
use std::time::Duration;
use tracing::error;

use thermal::traits::HeatSink;

/// The relay line plus its polarity.
pub struct Relay<P: OutputPin> {
    pin: P,
    /// True when the board switches on with the line low.
    invert: bool,
}

impl<P: OutputPin> Relay<P> {
    pub fn new(pin: P, invert: bool) -> Self {
        Self { pin, invert }
    }

    fn set(&mut self, on: bool) {
        let high = on != self.invert;
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(e) = result {
            error!("relay write failed: {e:?}");
        }
    }

    /// Asserts the element for `secs`, blocking.
    pub fn heat(&mut self, secs: f64) {
        self.set(true);
        sleep(secs);
    }

    /// Deasserts the element for `secs`, blocking. There is no active
    /// cooling; "cool" just means the elements are off.
    pub fn cool(&mut self, secs: f64) {
        self.set(false);
        sleep(secs);
    }

    /// Consumes the relay, returning the pin (used by tests to check mock
    /// expectations).
    pub fn release(self) -> P {
        self.pin
    }
}

fn sleep(secs: f64) {
    if secs > 0.0 {
        thread::sleep(Duration::from_secs_f64(secs));
    }
}

impl<P: OutputPin + Send> HeatSink for Relay<P> {
    fn apply(&mut self, duty: f64, tick_secs: f64) {
        let on = tick_secs * duty.clamp(0.0, 1.0);
        let off = tick_secs - on;
        if on > 0.0 {
            self.heat(on);
        }
        if off > 0.0 {
            self.cool(off);
        }
    }

    fn off(&mut self) {
        self.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::pin::{Mock as PinMock, State, Transaction};

    #[test]
    fn full_duty_only_asserts() {
        let pin = PinMock::new(&[Transaction::set(State::High)]);
        let mut relay = Relay::new(pin, false);
        relay.apply(1.0, 0.001);
        relay.release().done();
    }

    #[test]
    fn zero_duty_only_deasserts() {
        let pin = PinMock::new(&[
            Transaction::set(State::Low),
            Transaction::set(State::Low),
        ]);
        let mut relay = Relay::new(pin, false);
        relay.apply(0.0, 0.001);
        relay.off();
        relay.release().done();
    }

    #[test]
    fn partial_duty_asserts_then_deasserts() {
        let pin = PinMock::new(&[
            Transaction::set(State::High),
            Transaction::set(State::Low),
        ]);
        let mut relay = Relay::new(pin, false);
        relay.apply(0.5, 0.002);
        relay.release().done();
    }

    #[test]
    fn inverted_polarity_swaps_levels() {
        let pin = PinMock::new(&[
            Transaction::set(State::Low),
            Transaction::set(State::High),
        ]);
        let mut relay = Relay::new(pin, true);
        relay.apply(0.5, 0.002);
        relay.release().done();
    }
}
