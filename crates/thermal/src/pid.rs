//! A discrete-time PID controller for a heat-only kiln element.
//!
//! Outside a configurable error window the controller degenerates to bang-bang
//! (full heat / no heat): with kiln errors in the hundreds of degrees the
//! linear terms have nothing useful to say, and the window keeps the integral
//! from winding up across regime changes. Inside the window it is a
//! conventional PID with saturation-aware anti-windup. The output is a duty
//! cycle in `0..=1` — there is no active cooling, so negative commands are
//! floored at zero.

/// Internal span the linear terms are normalised against before the output is
/// reduced to a duty cycle.
const OUTPUT_SPAN: f64 = 100.0;

/// Soft-start limiter: below `below` degrees of setpoint, full-heat commands
/// are capped at `fraction` duty to avoid overshooting a cold, fast kiln.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub below: f64,
    pub fraction: f64,
}

/// One compute step's worth of controller internals, surfaced in the state
/// snapshot so the operator UI can plot the terms.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidStats {
    pub dt: f64,
    pub setpoint: f64,
    pub value: f64,
    pub error: f64,
    pub error_delta: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    /// Clamped linear output before normalisation (zero in the bang-bang regime).
    pub raw: f64,
    /// Final duty cycle, 0..=1.
    pub out: f64,
}

/// The kiln PID controller.
///
/// Note the historical gain convention inherited from the original tuning
/// workflow: `ki` is a *divisor* of the integral contribution, not a factor.
/// Existing tuned configurations depend on this, so it is preserved.
#[derive(Debug, Clone)]
pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Half-width of the error window within which the linear law applies.
    control_window: f64,
    throttle: Option<Throttle>,

    iterm: f64,
    last_error: f64,
    last_now: f64,
    stats: PidStats,
}

impl Pid {
    /// Creates a new controller. `now` seeds the timestamp used for the first
    /// step's `dt`.
    pub fn new(kp: f64, ki: f64, kd: f64, control_window: f64, now: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            control_window,
            throttle: None,
            iterm: 0.0,
            last_error: 0.0,
            last_now: now,
            stats: PidStats::default(),
        }
    }

    /// Enables the soft-start throttle.
    pub fn with_throttle(mut self, throttle: Option<Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Advances the controller one step and returns the duty cycle in `0..=1`.
    pub fn compute(&mut self, setpoint: f64, value: f64, now: f64) -> f64 {
        let dt = now - self.last_now;
        let error = setpoint - value;

        let mut error_delta = 0.0;
        let mut raw = 0.0;
        let mut output;

        if error < -self.control_window {
            // way above target: max cooling, and drop any accumulated heating
            // integral so it cannot command heat once we re-enter the window
            output = 0.0;
            if self.iterm > 0.0 {
                self.iterm = 0.0;
            }
        } else if error > self.control_window {
            // way below target: max heating (optionally throttled on soft start)
            output = 1.0;
            if let Some(throttle) = self.throttle {
                if setpoint <= throttle.below {
                    output = throttle.fraction;
                }
            }
        } else {
            let p = self.kp * error;

            if dt > 0.0 {
                error_delta = (error - self.last_error) / dt;
            }
            let d = self.kd * error_delta;

            let i_step = if self.ki != 0.0 && dt > 0.0 {
                error * dt / self.ki
            } else {
                0.0
            };

            // the integral state enters the sum as accumulated so far
            let unclamped = p + self.iterm + d;
            let clamped = unclamped.clamp(-OUTPUT_SPAN, OUTPUT_SPAN);

            // anti-windup: the integral only accumulates while unsaturated
            if unclamped == clamped {
                self.iterm += i_step;
            }

            raw = clamped;
            output = clamped / OUTPUT_SPAN;
        }

        self.last_error = error;
        self.last_now = now;

        // no active cooling
        if output < 0.0 {
            output = 0.0;
        }

        self.stats = PidStats {
            dt,
            setpoint,
            value,
            error,
            error_delta,
            p: self.kp * error,
            i: self.iterm,
            d: self.kd * error_delta,
            raw,
            out: output,
        };

        output
    }

    /// Forces the heater off for this tick: used during natural-cool segments
    /// when the kiln is already at or above target. Clears any positive
    /// integral so it cannot re-command heat on the next step.
    pub fn suppress_heating(&mut self) {
        if self.iterm > 0.0 {
            self.iterm = 0.0;
        }
        self.stats.raw = 0.0;
        self.stats.out = 0.0;
    }

    /// Clears the controller state for a fresh run.
    pub fn reset(&mut self, now: f64) {
        self.iterm = 0.0;
        self.last_error = 0.0;
        self.last_now = now;
        self.stats = PidStats::default();
    }

    /// The internals of the most recent step.
    pub fn stats(&self) -> PidStats {
        self.stats
    }
}
