//! Lumped thermodynamic model of an electric kiln.
//!
//! Two thermal masses: the heating element and the chamber. Element power is
//! scaled by the commanded duty cycle, heat flows element -> chamber through a
//! fixed thermal resistance, and the chamber leaks to the environment through
//! another. Euler-stepped once per control tick; crude, but it reproduces the
//! slow first-order response a real kiln shows well enough to exercise the
//! control loop, the interlocks and the cooling estimator.

use parking_lot::Mutex;
use std::sync::Arc;
use thermal::traits::{Clock, HeatSink, TemperatureSource};
use tracing::debug;

/// Physical constants of the simulated kiln.
#[derive(Debug, Clone, Copy)]
pub struct KilnParams {
    /// Environment temperature the chamber leaks toward.
    pub t_env: f64,
    /// Heat capacity of the element.
    pub c_heat: f64,
    /// Heat capacity of the chamber.
    pub c_oven: f64,
    /// Element power at full duty, watts.
    pub p_heat: f64,
    /// Chamber-to-environment thermal resistance.
    pub r_o_nocool: f64,
    /// Element-to-chamber thermal resistance.
    pub r_ho: f64,
}

impl Default for KilnParams {
    fn default() -> Self {
        Self {
            t_env: 65.0,
            c_heat: 100.0,
            c_oven: 5000.0,
            p_heat: 5450.0,
            r_o_nocool: 1.0,
            r_ho: 0.1,
        }
    }
}

/// The model state: chamber and element temperatures.
#[derive(Debug, Clone)]
pub struct KilnModel {
    params: KilnParams,
    /// Chamber temperature (what the thermocouple reads).
    t: f64,
    /// Element temperature.
    t_h: f64,
}

impl KilnModel {
    pub fn new(params: KilnParams) -> Self {
        Self {
            t: params.t_env,
            t_h: params.t_env,
            params,
        }
    }

    /// Starts the chamber at `temp` instead of ambient (a pre-heated kiln).
    pub fn with_initial_temp(params: KilnParams, temp: f64) -> Self {
        Self {
            t: temp,
            t_h: params.t_env,
            params,
        }
    }

    /// Chamber temperature.
    pub fn temperature(&self) -> f64 {
        self.t
    }

    /// Advances the model by one tick with the element on for `duty * dt`.
    pub fn step(&mut self, duty: f64, dt: f64) {
        let p = &self.params;

        // element heating
        let q_h = p.p_heat * dt * duty;
        self.t_h += q_h / p.c_heat;

        // heat flux element -> chamber
        let p_ho = (self.t_h - self.t) / p.r_ho;
        self.t += p_ho * dt / p.c_oven;
        self.t_h -= p_ho * dt / p.c_heat;

        // chamber leakage to the environment
        let p_env = (self.t - p.t_env) / p.r_o_nocool;
        self.t -= p_env * dt / p.c_oven;

        debug!(
            heater_w = (p.p_heat * duty) as i64,
            element = self.t_h as i64,
            oven_w = p_ho as i64,
            oven = self.t as i64,
            env_w = p_env as i64,
            "simulation step"
        );
    }
}

/// Shared handle to a [`KilnModel`]; the engine's temperature source and heat
/// sink both point at the same model.
#[derive(Clone)]
pub struct SimKiln {
    model: Arc<Mutex<KilnModel>>,
}

impl SimKiln {
    pub fn new(model: KilnModel) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
        }
    }

    /// Builds the matching heat sink for this kiln. `clock` paces the control
    /// loop (a sped-up clock makes simulated firings finish in seconds).
    pub fn heat_sink<C: Clock>(&self, clock: C) -> SimHeatSink<C> {
        SimHeatSink {
            kiln: self.clone(),
            clock,
        }
    }

    /// Direct read access for test assertions.
    pub fn chamber_temperature(&self) -> f64 {
        self.model.lock().temperature()
    }

    /// Overwrites the chamber temperature (test setup shortcut).
    pub fn set_chamber_temperature(&self, temp: f64) {
        self.model.lock().t = temp;
    }
}

impl TemperatureSource for SimKiln {
    fn temperature(&self) -> f64 {
        self.model.lock().temperature()
    }
}

/// Applies duty cycles to the model and sleeps the tick away on the supplied
/// clock, mirroring how the real relay paces the loop by blocking.
pub struct SimHeatSink<C> {
    kiln: SimKiln,
    clock: C,
}

impl<C: Clock> HeatSink for SimHeatSink<C> {
    fn apply(&mut self, duty: f64, tick_secs: f64) {
        self.kiln.model.lock().step(duty, tick_secs);
        self.clock.sleep(tick_secs);
    }

    fn off(&mut self) {
        // nothing latches in the model; an un-stepped element is off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heats_under_full_duty() {
        let mut model = KilnModel::new(KilnParams::default());
        for _ in 0..300 {
            model.step(1.0, 2.0);
        }
        assert!(
            model.temperature() > 100.0,
            "kiln failed to heat: {}",
            model.temperature()
        );
    }

    #[test]
    fn cools_toward_ambient_with_heater_off() {
        let params = KilnParams::default();
        let mut model = KilnModel::with_initial_temp(params, 500.0);
        let before = model.temperature();
        for _ in 0..300 {
            model.step(0.0, 2.0);
        }
        let after = model.temperature();
        assert!(after < before);
        assert!(after > params.t_env);
    }

    #[test]
    fn idle_kiln_stays_at_ambient() {
        let mut model = KilnModel::new(KilnParams::default());
        for _ in 0..100 {
            model.step(0.0, 2.0);
        }
        assert!((model.temperature() - 65.0).abs() < 1.0);
    }
}
